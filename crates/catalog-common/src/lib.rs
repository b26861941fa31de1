//! Common types shared across the PUDL data catalog crates.
//!
//! The centerpiece is [`build_filter`], which turns requested report years
//! and state codes into a DNF pushdown filter for partitioned Parquet data.

pub mod config;
pub mod error;
pub mod filter;
pub mod partition;

pub use config::{
    parquet_url, CatalogConfig, Protocol, CATALOG_VERSION, INTAKE_BUCKET, INTAKE_CACHE_VAR,
    INTAKE_PATH_VAR,
};
pub use error::{CatalogError, CatalogResult};
pub use filter::{
    build_filter, Conjunction, FilterBuilder, FilterSet, Operator, PredicateTerm, Region,
    ScalarValue, Year, STATE_COLUMN, YEAR_COLUMN,
};
pub use partition::{FilePattern, PartitionScheme, PartitionValues};
