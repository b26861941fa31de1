//! Parquet reads for catalog datasets.
//!
//! Filters are applied in three places, cheapest first:
//! 1. partition files whose path values rule out the filter are not fetched
//! 2. row groups whose min/max statistics rule it out are not fetched
//! 3. the remaining rows are filtered with arrow kernels
//!
//! `None` reads everything; an empty [`FilterSet`](catalog_common::FilterSet)
//! reads nothing but still reports the schema.

pub mod mask;
pub mod prune;
pub mod reader;
pub mod source;

pub use mask::{filter_batch, selection_mask};
pub use prune::{prune_row_groups, row_group_may_match};
pub use reader::{read_entry, DatasetReader, ScanResult, ScanStats, DEFAULT_BATCH_SIZE};
pub use source::{RangeReader, FOOTER_SIZE_HINT};

use catalog_common::CatalogError;

pub(crate) fn data_error(err: impl std::fmt::Display) -> CatalogError {
    CatalogError::DataReadError(err.to_string())
}
