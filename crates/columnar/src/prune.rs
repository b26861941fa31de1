//! Row group pruning from Parquet column statistics.

use parquet::file::metadata::{ParquetMetaData, RowGroupMetaData};
use parquet::file::statistics::Statistics;

use catalog_common::{FilterSet, PredicateTerm, ScalarValue};

/// Indices of the row groups that may contain rows selected by `filter`.
pub fn prune_row_groups(metadata: &ParquetMetaData, filter: &FilterSet) -> Vec<usize> {
    metadata
        .row_groups()
        .iter()
        .enumerate()
        .filter(|(_, rg)| row_group_may_match(rg, filter))
        .map(|(i, _)| i)
        .collect()
}

/// Whether a row group's statistics leave room for any conjunction of `filter`.
pub fn row_group_may_match(row_group: &RowGroupMetaData, filter: &FilterSet) -> bool {
    filter.may_match(|term| term_in_range(row_group, term))
}

/// `Some(false)` when the column's min/max exclude the term's value,
/// `None` when statistics are missing or of an unexpected type.
fn term_in_range(row_group: &RowGroupMetaData, term: &PredicateTerm) -> Option<bool> {
    let column = row_group
        .columns()
        .iter()
        .find(|c| c.column_path().string() == term.column)?;
    let stats = column.statistics()?;
    if !stats.has_min_max_set() {
        return None;
    }

    match (&term.value, stats) {
        (ScalarValue::Int(v), Statistics::Int32(s)) => {
            Some(i64::from(*s.min()) <= *v && *v <= i64::from(*s.max()))
        }
        (ScalarValue::Int(v), Statistics::Int64(s)) => Some(*s.min() <= *v && *v <= *s.max()),
        (ScalarValue::Utf8(v), Statistics::ByteArray(s)) => {
            let min = s.min().as_utf8().ok()?;
            let max = s.max().as_utf8().ok()?;
            Some(min <= v.as_str() && v.as_str() <= max)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use catalog_common::build_filter;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use test_utils::fixtures::{epacems_parquet_bytes, TEST_STATES, TEST_YEARS};

    fn metadata() -> std::sync::Arc<ParquetMetaData> {
        let bytes = Bytes::from(epacems_parquet_bytes(TEST_YEARS, TEST_STATES, 4));
        ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .metadata()
            .clone()
    }

    #[test]
    fn test_one_row_group_per_partition() {
        let metadata = metadata();
        assert_eq!(
            metadata.num_row_groups(),
            TEST_YEARS.len() * TEST_STATES.len()
        );
    }

    #[test]
    fn test_prunes_to_requested_partition() {
        let metadata = metadata();
        let filter = build_filter(&[2020], &["ID"]).unwrap().unwrap();
        let kept = prune_row_groups(&metadata, &filter);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_year_only_keeps_every_state() {
        let metadata = metadata();
        let filter = build_filter::<&str>(&[2019], &[]).unwrap().unwrap();
        assert_eq!(prune_row_groups(&metadata, &filter).len(), TEST_STATES.len());
    }

    #[test]
    fn test_unknown_value_prunes_everything() {
        let metadata = metadata();
        let filter = build_filter(&[1995], &["ID"]).unwrap().unwrap();
        assert!(prune_row_groups(&metadata, &filter).is_empty());
    }

    #[test]
    fn test_empty_filter_prunes_everything() {
        let metadata = metadata();
        assert!(prune_row_groups(&metadata, &FilterSet::matches_nothing()).is_empty());
    }
}
