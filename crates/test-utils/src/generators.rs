//! Synthetic EPA CEMS-like record batches.
//!
//! Values are deterministic functions of (year, state, row) so a test can
//! tell exactly which partition a row came from.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{TimeZone, Utc};

/// Column layout of the hourly emissions table.
pub fn epacems_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("plant_id_eia", DataType::Int32, false),
        Field::new("year", DataType::Int32, false),
        Field::new("state", DataType::Utf8, false),
        Field::new(
            "operating_datetime_utc",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("gross_load_mw", DataType::Float64, false),
        Field::new("co2_mass_tons", DataType::Float64, true),
    ]))
}

/// Plant id derived from the state code, so each state has its own plant.
///
/// ```
/// use test_utils::plant_id_for_state;
///
/// assert_eq!(plant_id_for_state("ID"), plant_id_for_state("ID"));
/// assert_ne!(plant_id_for_state("ID"), plant_id_for_state("NY"));
/// ```
pub fn plant_id_for_state(state: &str) -> i32 {
    state
        .bytes()
        .fold(0i32, |acc, b| acc.wrapping_mul(1000).wrapping_add(i32::from(b)))
}

/// Gross load for one hour: `year + row` plus a per-state offset.
pub fn gross_load(year: i32, state: &str, row: usize) -> f64 {
    f64::from(year) + row as f64 + f64::from(plant_id_for_state(state)) / 10_000.0
}

/// One hourly batch for a single (year, state) partition.
///
/// Timestamps start at midnight UTC on January 1st of `year`. Every seventh
/// hour has a null CO2 mass, as real CEMS data does for unmeasured hours.
pub fn epacems_batch(year: i32, state: &str, rows: usize) -> RecordBatch {
    let start = Utc
        .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .expect("valid start of year")
        .timestamp_millis();
    let plant_id = plant_id_for_state(state);

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(vec![plant_id; rows])),
        Arc::new(Int32Array::from(vec![year; rows])),
        Arc::new(StringArray::from(vec![state; rows])),
        Arc::new(
            TimestampMillisecondArray::from(
                (0..rows)
                    .map(|h| start + h as i64 * 3_600_000)
                    .collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(Float64Array::from(
            (0..rows).map(|r| gross_load(year, state, r)).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            (0..rows)
                .map(|r| (r % 7 != 6).then(|| gross_load(year, state, r) * 0.5))
                .collect::<Vec<_>>(),
        )),
    ];

    RecordBatch::try_new(epacems_schema(), columns).expect("columns match schema")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn test_batch_shape() {
        let batch = epacems_batch(2020, "ID", 24);
        assert_eq!(batch.num_rows(), 24);
        assert_eq!(batch.num_columns(), 6);
        assert_eq!(batch.schema(), epacems_schema());
    }

    #[test]
    fn test_null_every_seventh_hour() {
        let batch = epacems_batch(2020, "ID", 14);
        let co2 = batch.column(5);
        assert_eq!(co2.null_count(), 2);
        assert!(co2.is_null(6));
        assert!(co2.is_null(13));
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(epacems_batch(2020, "ID", 0).num_rows(), 0);
    }
}
