//! Storage layer for the PUDL data catalog.
//!
//! Provides:
//! - Object storage access (GCS, S3, HTTPS mirrors, local files)
//! - The YAML catalog and typed entry lookup
//! - A local cache for downloaded objects
//! - Read-only SQLite database access

pub mod availability;
pub mod cache;
pub mod catalog;
pub mod object_store;
pub mod sqlite;

pub use self::object_store::{ObjectStorage, StorageLocation};
pub use availability::{check_files, CheckMethod, FileStatus, EXPECTED_FILES};
pub use cache::{
    CacheStats, PartitionCache, DEFAULT_MAX_MEMORY_OBJECT_SIZE, DEFAULT_MEMORY_CAPACITY,
};
pub use catalog::{
    expand_template, Catalog, CatalogEntry, DatasetLayout, EntryMetadata, EntrySource,
    ParquetSource, SqliteSource, REQUIRED_METADATA_FIELDS,
};
pub use sqlite::SqliteDatabase;
