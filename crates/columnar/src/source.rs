//! Ranged Parquet input over an [`ObjectStorage`].
//!
//! Only the footer and the column chunks of selected row groups are
//! requested from the store, so a filtered read of a large monolithic file
//! never downloads the whole object.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use parquet::arrow::async_reader::{fetch_parquet_metadata, AsyncFileReader};
use parquet::errors::{ParquetError, Result as ParquetResult};
use parquet::file::metadata::ParquetMetaData;

use catalog_common::{CatalogError, CatalogResult};
use storage::ObjectStorage;

/// Bytes read from the end of a file in the first footer request.
pub const FOOTER_SIZE_HINT: usize = 64 * 1024;

/// Implements parquet's `AsyncFileReader` with ranged object reads.
#[derive(Debug, Clone)]
pub struct RangeReader {
    storage: ObjectStorage,
    key: String,
    size: usize,
    footer_size_hint: Option<usize>,
    fetched: Arc<AtomicU64>,
}

impl RangeReader {
    /// Look up the object's size; fails with `NotFound` if it is missing.
    pub async fn open(storage: ObjectStorage, key: &str) -> CatalogResult<Self> {
        let size = storage.size(key).await?;
        Ok(Self {
            storage,
            key: key.to_string(),
            size,
            footer_size_hint: Some(FOOTER_SIZE_HINT),
            fetched: Arc::new(AtomicU64::new(0)),
        })
    }

    /// `None` reads the 8-byte footer first, then exactly the metadata.
    pub fn with_footer_size_hint(mut self, hint: Option<usize>) -> Self {
        self.footer_size_hint = hint;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes fetched so far by this reader and its clones.
    pub fn bytes_fetched(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    async fn fetch(&self, range: Range<usize>) -> ParquetResult<Bytes> {
        let bytes = self
            .storage
            .get_range(&self.key, range)
            .await
            .map_err(external)?;
        self.fetched.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }
}

fn external(err: CatalogError) -> ParquetError {
    ParquetError::External(Box::new(err))
}

impl AsyncFileReader for RangeReader {
    fn get_bytes(&mut self, range: Range<usize>) -> BoxFuture<'_, ParquetResult<Bytes>> {
        Box::pin(self.fetch(range))
    }

    fn get_byte_ranges(
        &mut self,
        ranges: Vec<Range<usize>>,
    ) -> BoxFuture<'_, ParquetResult<Vec<Bytes>>> {
        Box::pin(async move {
            let parts = self
                .storage
                .get_ranges(&self.key, &ranges)
                .await
                .map_err(external)?;
            let total: usize = parts.iter().map(Bytes::len).sum();
            self.fetched.fetch_add(total as u64, Ordering::Relaxed);
            Ok(parts)
        })
    }

    fn get_metadata(&mut self) -> BoxFuture<'_, ParquetResult<Arc<ParquetMetaData>>> {
        Box::pin(async move {
            let this = &*self;
            let metadata =
                fetch_parquet_metadata(move |range| this.fetch(range), this.size, this.footer_size_hint)
                    .await?;
            Ok(Arc::new(metadata))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_common::Protocol;
    use object_store::{memory::InMemory, path::Path as StorePath, ObjectStore};
    use test_utils::fixtures::epacems_parquet_bytes;

    async fn storage_with(key: &str, data: Vec<u8>) -> ObjectStorage {
        let store = Arc::new(InMemory::new());
        store
            .put(&StorePath::from(key), Bytes::from(data))
            .await
            .unwrap();
        ObjectStorage::from_store(store, Protocol::Gs, "gs/intake.catalyst.coop")
    }

    #[tokio::test]
    async fn test_metadata_reads_only_the_footer() {
        let data = epacems_parquet_bytes(&[2019, 2020], &["CA", "ID"], 500);
        let size = data.len();
        let storage = storage_with("v0.1.0/epacems.parquet", data).await;

        let mut reader = RangeReader::open(storage, "v0.1.0/epacems.parquet")
            .await
            .unwrap()
            .with_footer_size_hint(None);
        assert_eq!(reader.size(), size);

        let metadata = reader.get_metadata().await.unwrap();
        assert_eq!(metadata.num_row_groups(), 4);
        assert!(reader.bytes_fetched() > 0);
        assert!(reader.bytes_fetched() < size as u64);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = storage_with("v0.1.0/epacems.parquet", vec![0; 16]).await;
        let err = RangeReader::open(storage, "v0.1.0/missing.parquet")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
