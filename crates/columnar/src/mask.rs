//! Row filtering of record batches against a DNF filter.

use arrow::array::{Array, ArrayRef, BooleanArray, Int64Array, StringArray};
use arrow::compute::kernels::cmp::eq;
use arrow::compute::{and_kleene, cast, filter_record_batch, or_kleene};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use catalog_common::{
    CatalogError, CatalogResult, Conjunction, FilterSet, PartitionValues, PredicateTerm,
    ScalarValue,
};

use crate::data_error;

/// Keep the rows of `batch` selected by `filter`.
///
/// Terms on columns absent from the batch are answered from `partition`
/// (values encoded in the file path). A term on a column found in neither
/// place is an error. Null cells never match.
pub fn filter_batch(
    batch: &RecordBatch,
    filter: &FilterSet,
    partition: &PartitionValues,
) -> CatalogResult<RecordBatch> {
    let mask = selection_mask(batch, filter, partition)?;
    if mask.true_count() == batch.num_rows() && mask.null_count() == 0 {
        return Ok(batch.clone());
    }
    filter_record_batch(batch, &mask).map_err(data_error)
}

/// Boolean selection over the rows of `batch`.
pub fn selection_mask(
    batch: &RecordBatch,
    filter: &FilterSet,
    partition: &PartitionValues,
) -> CatalogResult<BooleanArray> {
    let rows = batch.num_rows();
    let mut mask: Option<BooleanArray> = None;

    for conjunction in filter {
        let selected = conjunction_mask(batch, conjunction, partition)?;
        mask = Some(match mask {
            Some(acc) => or_kleene(&acc, &selected).map_err(data_error)?,
            None => selected,
        });
    }

    Ok(mask.unwrap_or_else(|| constant(false, rows)))
}

fn conjunction_mask(
    batch: &RecordBatch,
    conjunction: &Conjunction,
    partition: &PartitionValues,
) -> CatalogResult<BooleanArray> {
    let mut mask: Option<BooleanArray> = None;
    for term in conjunction.terms() {
        let selected = term_mask(batch, term, partition)?;
        mask = Some(match mask {
            Some(acc) => and_kleene(&acc, &selected).map_err(data_error)?,
            None => selected,
        });
    }
    Ok(mask.unwrap_or_else(|| constant(true, batch.num_rows())))
}

fn term_mask(
    batch: &RecordBatch,
    term: &PredicateTerm,
    partition: &PartitionValues,
) -> CatalogResult<BooleanArray> {
    let column = match batch.column_by_name(&term.column) {
        Some(column) => column,
        None => {
            return match partition.get(&term.column) {
                Some(raw) => Ok(constant(
                    term.value.matches_partition_value(raw),
                    batch.num_rows(),
                )),
                None => Err(CatalogError::ColumnNotFound(term.column.clone())),
            }
        }
    };

    match &term.value {
        ScalarValue::Int(v) => {
            let values = cast_column(column, &DataType::Int64, &term.column)?;
            eq(&values, &Int64Array::new_scalar(*v)).map_err(data_error)
        }
        ScalarValue::Utf8(v) => {
            let values = cast_column(column, &DataType::Utf8, &term.column)?;
            eq(&values, &StringArray::new_scalar(v.as_str())).map_err(data_error)
        }
    }
}

fn cast_column(column: &ArrayRef, to: &DataType, name: &str) -> CatalogResult<ArrayRef> {
    if column.data_type() == to {
        return Ok(column.clone());
    }
    cast(column, to).map_err(|e| {
        CatalogError::DataReadError(format!(
            "column {} ({}) cannot be compared as {}: {}",
            name,
            column.data_type(),
            to,
            e
        ))
    })
}

fn constant(value: bool, len: usize) -> BooleanArray {
    BooleanArray::from(vec![value; len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use catalog_common::build_filter;
    use std::sync::Arc;
    use arrow::datatypes::{Field, Schema};
    use test_utils::generators::epacems_batch;

    fn two_states() -> RecordBatch {
        arrow::compute::concat_batches(
            &test_utils::generators::epacems_schema(),
            &[epacems_batch(2020, "ID", 5), epacems_batch(2020, "NY", 3)],
        )
        .unwrap()
    }

    #[test]
    fn test_filter_by_state() {
        let batch = two_states();
        let filter = build_filter(&[2020], &["NY"]).unwrap().unwrap();
        let out = filter_batch(&batch, &filter, &PartitionValues::default()).unwrap();
        assert_eq!(out.num_rows(), 3);
    }

    #[test]
    fn test_or_of_conjunctions() {
        let batch = two_states();
        let filter = build_filter(&[2020], &["NY", "ID"]).unwrap().unwrap();
        let out = filter_batch(&batch, &filter, &PartitionValues::default()).unwrap();
        assert_eq!(out.num_rows(), 8);
    }

    #[test]
    fn test_empty_filter_selects_nothing() {
        let batch = two_states();
        let out = filter_batch(&batch, &FilterSet::matches_nothing(), &PartitionValues::default())
            .unwrap();
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.schema(), batch.schema());
    }

    #[test]
    fn test_missing_column_uses_partition_values() {
        let schema = Arc::new(Schema::new(vec![Field::new("plant_id_eia", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))])
            .unwrap();

        let mut partition = PartitionValues::default();
        partition.insert("year", "2020");
        partition.insert("state", "id");

        let hit = build_filter(&[2020], &["ID"]).unwrap().unwrap();
        assert_eq!(filter_batch(&batch, &hit, &partition).unwrap().num_rows(), 3);

        let miss = build_filter(&[2019], &["ID"]).unwrap().unwrap();
        assert_eq!(filter_batch(&batch, &miss, &partition).unwrap().num_rows(), 0);
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let schema = Arc::new(Schema::new(vec![Field::new("plant_id_eia", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1]))]).unwrap();
        let filter = build_filter::<&str>(&[2020], &[]).unwrap().unwrap();
        assert!(matches!(
            filter_batch(&batch, &filter, &PartitionValues::default()),
            Err(CatalogError::ColumnNotFound(c)) if c == "year"
        ));
    }

    #[test]
    fn test_nulls_never_match() {
        let schema = Arc::new(Schema::new(vec![Field::new("year", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(vec![Some(2020), None, Some(2019)]))],
        )
        .unwrap();
        let filter = build_filter::<&str>(&[2020], &[]).unwrap().unwrap();
        assert_eq!(
            filter_batch(&batch, &filter, &PartitionValues::default())
                .unwrap()
                .num_rows(),
            1
        );
    }
}
