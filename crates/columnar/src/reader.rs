//! Parquet dataset reads with partition pruning.
//!
//! Files are opened through parquet's async reader. Without a cache only
//! the footer and the selected row groups are fetched; with a cache,
//! partition files are mirrored whole and decoded from memory. Monolithic
//! files are always read by range.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use parquet::arrow::async_reader::AsyncFileReader;
use parquet::arrow::ParquetRecordBatchStreamBuilder;
use tracing::{debug, info, instrument, warn};

use catalog_common::{
    CatalogError, CatalogResult, FilePattern, FilterSet, PartitionScheme, PartitionValues,
    ScalarValue,
};
use storage::{CatalogEntry, DatasetLayout, ObjectStorage, PartitionCache};

use crate::data_error;
use crate::mask::filter_batch;
use crate::prune::prune_row_groups;
use crate::source::{RangeReader, FOOTER_SIZE_HINT};

/// Rows per decoded batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Counters describing how much work a scan did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_listed: usize,
    pub files_pruned: usize,
    pub files_read: usize,
    pub row_groups_total: usize,
    pub row_groups_pruned: usize,
    /// Bytes pulled from the store or the cache.
    pub bytes_fetched: u64,
    pub rows_read: usize,
    pub rows_returned: usize,
}

/// Result of reading a dataset.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub batch: RecordBatch,
    pub stats: ScanStats,
}

impl ScanResult {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> RecordBatch {
        self.batch.slice(0, n.min(self.batch.num_rows()))
    }
}

struct DecodedFile {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    row_groups_total: usize,
    row_groups_pruned: usize,
    rows_read: usize,
    bytes_fetched: u64,
}

/// Reads Parquet datasets from one store.
pub struct DatasetReader {
    storage: ObjectStorage,
    cache: Option<Arc<PartitionCache>>,
    batch_size: usize,
    footer_size_hint: Option<usize>,
    schema_source: Option<(ObjectStorage, String)>,
}

impl DatasetReader {
    pub fn new(storage: ObjectStorage) -> Self {
        Self {
            storage,
            cache: None,
            batch_size: DEFAULT_BATCH_SIZE,
            footer_size_hint: Some(FOOTER_SIZE_HINT),
            schema_source: None,
        }
    }

    /// Route partition file fetches through a local cache.
    pub fn with_cache(mut self, cache: Arc<PartitionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Bytes requested from the end of a file when reading its footer.
    pub fn with_footer_size_hint(mut self, hint: Option<usize>) -> Self {
        self.footer_size_hint = hint;
        self
    }

    /// File whose footer supplies the schema when a partitioned read finds
    /// no partition file to take it from.
    pub fn with_schema_source(mut self, storage: ObjectStorage, key: impl Into<String>) -> Self {
        self.schema_source = Some((storage, key.into()));
        self
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    async fn open_range(&self, storage: &ObjectStorage, key: &str) -> CatalogResult<RangeReader> {
        Ok(RangeReader::open(storage.clone(), key)
            .await?
            .with_footer_size_hint(self.footer_size_hint))
    }

    /// Decode one file, fetching only what the filter needs.
    async fn read_file(
        &self,
        key: &str,
        filter: Option<&FilterSet>,
        partition: &PartitionValues,
        use_cache: bool,
    ) -> CatalogResult<DecodedFile> {
        match &self.cache {
            Some(cache) if use_cache => {
                let bytes = cache.get_or_fetch(&self.storage, key).await?;
                let fetched = bytes.len() as u64;
                let mut decoded =
                    decode(Cursor::new(bytes), filter, partition, self.batch_size).await?;
                decoded.bytes_fetched = fetched;
                Ok(decoded)
            }
            _ => {
                let input = self.open_range(&self.storage, key).await?;
                let counter = input.clone();
                let mut decoded = decode(input, filter, partition, self.batch_size).await?;
                decoded.bytes_fetched = counter.bytes_fetched();
                Ok(decoded)
            }
        }
    }

    /// Read a single Parquet file.
    ///
    /// Row groups whose statistics exclude every conjunction are never
    /// fetched; the remaining rows are filtered exactly.
    #[instrument(skip(self, filter), fields(store = %self.storage.store_id()))]
    pub async fn read_single(
        &self,
        key: &str,
        filter: Option<&FilterSet>,
    ) -> CatalogResult<ScanResult> {
        let decoded = self
            .read_file(key, filter, &PartitionValues::default(), false)
            .await?;
        let mut stats = ScanStats {
            files_listed: 1,
            files_read: 1,
            row_groups_total: decoded.row_groups_total,
            row_groups_pruned: decoded.row_groups_pruned,
            bytes_fetched: decoded.bytes_fetched,
            rows_read: decoded.rows_read,
            ..Default::default()
        };

        let batch = concat(&decoded.schema, decoded.batches)?;
        stats.rows_returned = batch.num_rows();
        log_scan(key, filter, &stats);
        Ok(ScanResult { batch, stats })
    }

    /// Read a directory of partition files under `prefix`.
    ///
    /// Files are read in sorted key order. Files whose path-encoded values
    /// rule out every conjunction are never fetched.
    #[instrument(skip(self, scheme, filter), fields(store = %self.storage.store_id()))]
    pub async fn read_partitioned(
        &self,
        prefix: &str,
        scheme: &PartitionScheme,
        filter: Option<&FilterSet>,
    ) -> CatalogResult<ScanResult> {
        let prefix = prefix.trim_matches('/');
        let keys = self.partition_keys(prefix, scheme, filter).await?;
        if keys.is_empty() && !filter.map_or(false, FilterSet::is_empty) {
            return Err(CatalogError::NotFound(format!("no parquet files under {}", prefix)));
        }

        let mut stats = ScanStats {
            files_listed: keys.len(),
            ..Default::default()
        };
        let mut schema: Option<SchemaRef> = None;
        let mut batches = Vec::new();

        for key in &keys {
            let relative = key.strip_prefix(prefix).unwrap_or(key);
            let partition = scheme.extract(relative)?;

            if let Some(filter) = filter {
                if !partition.may_match(filter) {
                    debug!(key = %key, "Pruned partition");
                    stats.files_pruned += 1;
                    continue;
                }
            }

            let decoded = match self.read_file(key, filter, &partition, true).await {
                Ok(decoded) => decoded,
                Err(e) if e.is_not_found() && !self.storage.protocol().supports_listing() => {
                    debug!(key = %key, "Partition not published");
                    stats.files_pruned += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            stats.files_read += 1;
            stats.bytes_fetched += decoded.bytes_fetched;
            stats.row_groups_total += decoded.row_groups_total;
            stats.row_groups_pruned += decoded.row_groups_pruned;
            stats.rows_read += decoded.rows_read;
            let schema = schema.get_or_insert_with(|| decoded.schema.clone());
            for batch in decoded.batches {
                batches.push(conform(schema, batch)?);
            }
        }

        let schema = match schema {
            Some(schema) => schema,
            None => self.fallback_schema(&keys).await?,
        };
        let batch = concat(&schema, batches)?;
        stats.rows_returned = batch.num_rows();
        log_scan(prefix, filter, &stats);
        Ok(ScanResult { batch, stats })
    }

    /// Keys of candidate partition files, sorted.
    ///
    /// Stores that cannot list (plain HTTPS) fall back to rendering file
    /// names from the scheme's file pattern and the filter's values.
    async fn partition_keys(
        &self,
        prefix: &str,
        scheme: &PartitionScheme,
        filter: Option<&FilterSet>,
    ) -> CatalogResult<Vec<String>> {
        if self.storage.protocol().supports_listing() {
            let listed = self.storage.list(prefix).await?;
            return Ok(listed
                .into_iter()
                .filter(|key| is_data_file(key))
                .collect());
        }

        let names = rendered_file_names(scheme, filter).ok_or_else(|| {
            CatalogError::invalid_parameter(
                "protocol",
                format!(
                    "{} cannot list {}; a file pattern and a filter naming every partition column are required",
                    self.storage.protocol(),
                    prefix
                ),
            )
        })?;
        Ok(names
            .into_iter()
            .map(|name| format!("{}/{}", prefix, name))
            .collect())
    }

    /// Schema of the first readable file in `keys`, else of the schema
    /// source. Only footers are fetched.
    async fn fallback_schema(&self, keys: &[String]) -> CatalogResult<SchemaRef> {
        for key in keys {
            match self.file_schema(&self.storage, key).await {
                Ok(schema) => return Ok(schema),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        if let Some((storage, key)) = &self.schema_source {
            return self.file_schema(storage, key).await;
        }
        warn!("No file to take the schema from");
        Ok(Arc::new(Schema::empty()))
    }

    async fn file_schema(&self, storage: &ObjectStorage, key: &str) -> CatalogResult<SchemaRef> {
        let input = self.open_range(storage, key).await?;
        let builder = ParquetRecordBatchStreamBuilder::new(input)
            .await
            .map_err(data_error)?;
        Ok(builder.schema().clone())
    }
}

/// Read a Parquet catalog entry, connecting to the store it lives in.
pub async fn read_entry(
    entry: &CatalogEntry,
    filter: Option<&FilterSet>,
    cache: Option<Arc<PartitionCache>>,
) -> CatalogResult<ScanResult> {
    let source = entry.parquet()?;
    let storage = ObjectStorage::connect(&source.location)?;
    let mut reader = DatasetReader::new(storage);
    if let Some(cache) = cache {
        reader = reader.with_cache(cache);
    }
    if let Some(location) = &source.schema_location {
        reader = reader.with_schema_source(ObjectStorage::connect(location)?, location.path.clone());
    }

    info!(entry = %entry.name, location = %source.location, "Reading catalog entry");
    match &source.layout {
        DatasetLayout::SingleFile => reader.read_single(&source.location.path, filter).await,
        DatasetLayout::Partitioned(scheme) => {
            reader
                .read_partitioned(&source.location.path, scheme, filter)
                .await
        }
    }
}

async fn decode<T>(
    input: T,
    filter: Option<&FilterSet>,
    partition: &PartitionValues,
    batch_size: usize,
) -> CatalogResult<DecodedFile>
where
    T: AsyncFileReader + Unpin + Send + 'static,
{
    let builder = ParquetRecordBatchStreamBuilder::new(input)
        .await
        .map_err(data_error)?;
    let schema = builder.schema().clone();
    let metadata = builder.metadata().clone();
    let row_groups_total = metadata.num_row_groups();

    let selected = match filter {
        Some(filter) => prune_row_groups(&metadata, filter),
        None => (0..row_groups_total).collect(),
    };
    let rows_read = selected
        .iter()
        .map(|&i| metadata.row_group(i).num_rows().max(0) as usize)
        .sum();

    let mut decoded = DecodedFile {
        schema,
        batches: Vec::new(),
        row_groups_total,
        row_groups_pruned: row_groups_total - selected.len(),
        rows_read,
        bytes_fetched: 0,
    };
    if selected.is_empty() {
        return Ok(decoded);
    }

    let mut stream = builder
        .with_row_groups(selected)
        .with_batch_size(batch_size)
        .build()
        .map_err(data_error)?;

    while let Some(batch) = stream.try_next().await.map_err(data_error)? {
        let batch = match filter {
            Some(filter) => filter_batch(&batch, filter, partition)?,
            None => batch,
        };
        if batch.num_rows() > 0 {
            decoded.batches.push(batch);
        }
    }
    Ok(decoded)
}

/// Re-label a batch with the dataset schema so batches from different
/// files concatenate. Fails if column types differ.
fn conform(schema: &SchemaRef, batch: RecordBatch) -> CatalogResult<RecordBatch> {
    if batch.schema() == *schema {
        return Ok(batch);
    }
    RecordBatch::try_new(schema.clone(), batch.columns().to_vec()).map_err(|e| {
        CatalogError::DataReadError(format!("partition schema mismatch: {}", e))
    })
}

fn concat(schema: &SchemaRef, batches: Vec<RecordBatch>) -> CatalogResult<RecordBatch> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema.clone()));
    }
    concat_batches(schema, &batches).map_err(data_error)
}

fn is_data_file(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.ends_with(".parquet") && !name.starts_with('.') && !name.starts_with('_')
}

/// File names implied by `filter` under `scheme`'s file pattern, or `None`
/// when some conjunction leaves a pattern field open.
fn rendered_file_names(scheme: &PartitionScheme, filter: Option<&FilterSet>) -> Option<Vec<String>> {
    let pattern = FilePattern::parse(scheme.file_pattern.as_deref()?).ok()?;
    let filter = filter?;

    let mut names = BTreeSet::new();
    for conjunction in filter {
        let values: Vec<(String, String)> = conjunction
            .terms()
            .iter()
            .map(|term| {
                let value = match &term.value {
                    ScalarValue::Int(v) => v.to_string(),
                    ScalarValue::Utf8(v) => v.clone(),
                };
                (term.column.clone(), value)
            })
            .collect();
        let refs: Vec<(&str, &str)> = values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        names.insert(pattern.render(&refs).ok()?);
    }
    Some(names.into_iter().collect())
}

fn log_scan(target: &str, filter: Option<&FilterSet>, stats: &ScanStats) {
    let filter = filter.map_or_else(|| "none".to_string(), |f| f.to_string());
    info!(
        target_path = %target,
        filter = %filter,
        files_read = stats.files_read,
        files_pruned = stats.files_pruned,
        row_groups_pruned = stats.row_groups_pruned,
        rows_returned = stats.rows_returned,
        "Scan complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_common::build_filter;

    fn epacems_scheme() -> PartitionScheme {
        PartitionScheme::new(
            vec!["year".into(), "state".into()],
            Some("epacems-{year}-{state}.parquet".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_rendered_file_names() {
        let filter = build_filter(&[2020, 2019], &["NY", "CA"]).unwrap();
        let names = rendered_file_names(&epacems_scheme(), filter.as_ref()).unwrap();
        assert_eq!(
            names,
            vec![
                "epacems-2019-CA.parquet",
                "epacems-2019-NY.parquet",
                "epacems-2020-CA.parquet",
                "epacems-2020-NY.parquet",
            ]
        );
    }

    #[test]
    fn test_rendering_needs_every_field() {
        let years_only = build_filter::<&str>(&[2020], &[]).unwrap();
        assert!(rendered_file_names(&epacems_scheme(), years_only.as_ref()).is_none());
        assert!(rendered_file_names(&epacems_scheme(), None).is_none());

        let empty = FilterSet::matches_nothing();
        assert_eq!(
            rendered_file_names(&epacems_scheme(), Some(&empty)),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_is_data_file() {
        assert!(is_data_file("v0.1.0/hourly_emissions_epacems/epacems-2020-ID.parquet"));
        assert!(!is_data_file("v0.1.0/hourly_emissions_epacems/_SUCCESS"));
        assert!(!is_data_file("v0.1.0/hourly_emissions_epacems/.epacems-2020-ID.parquet.tmp"));
        assert!(!is_data_file("v0.1.0/hourly_emissions_epacems/README.md"));
    }
}
