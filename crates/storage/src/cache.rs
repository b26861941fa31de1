//! Local cache for remote catalog objects.
//!
//! Two tiers:
//! - an in-memory LRU of recently read objects no larger than
//!   [`DEFAULT_MAX_MEMORY_OBJECT_SIZE`]
//! - a disk mirror under `<cache_dir>/<protocol>/<bucket or host>/<key>`
//!
//! Objects on the local filesystem are never copied; reads go straight to
//! the store.

use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use catalog_common::{CatalogError, CatalogResult, Protocol};

use crate::object_store::ObjectStorage;

/// Default number of objects kept in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 16;

/// Larger objects are only mirrored on disk.
pub const DEFAULT_MAX_MEMORY_OBJECT_SIZE: usize = 64 * 1024 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bytes_fetched: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    /// Percentage of lookups served without touching the store.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits() as f64 / total as f64) * 100.0
        }
    }
}

/// Memory and disk cache in front of an [`ObjectStorage`].
pub struct PartitionCache {
    cache_dir: PathBuf,
    memory: Arc<Mutex<LruCache<String, Bytes>>>,
    stats: Arc<Mutex<CacheStats>>,
    capacity: usize,
    max_object_size: usize,
}

impl PartitionCache {
    /// Create a cache rooted at `cache_dir` holding up to `capacity`
    /// objects in memory.
    pub fn new(cache_dir: impl Into<PathBuf>, capacity: usize) -> CatalogResult<Self> {
        let cache_size = NonZeroUsize::new(capacity).ok_or_else(|| {
            CatalogError::invalid_parameter("capacity", "memory cache capacity must be > 0")
        })?;

        Ok(Self {
            cache_dir: cache_dir.into(),
            memory: Arc::new(Mutex::new(LruCache::new(cache_size))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
            capacity,
            max_object_size: DEFAULT_MAX_MEMORY_OBJECT_SIZE,
        })
    }

    /// Keep only objects of at most `bytes` in memory.
    pub fn with_max_object_size(mut self, bytes: usize) -> Self {
        self.max_object_size = bytes;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Where a remote object is mirrored on disk.
    pub fn disk_path(&self, storage: &ObjectStorage, key: &str) -> CatalogResult<PathBuf> {
        let relative = Path::new(storage.store_id()).join(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CatalogError::CacheError(format!(
                "refusing to cache {} outside {}",
                key,
                self.cache_dir.display()
            )));
        }
        Ok(self.cache_dir.join(relative))
    }

    /// Read an object, trying memory, then disk, then the store.
    #[instrument(skip(self, storage), fields(store = %storage.store_id()))]
    pub async fn get_or_fetch(&self, storage: &ObjectStorage, key: &str) -> CatalogResult<Bytes> {
        if storage.protocol() == Protocol::Local {
            return storage.get(key).await;
        }

        let memory_key = format!("{}/{}", storage.store_id(), key);
        {
            let mut memory = self.memory.lock().await;
            if let Some(data) = memory.get(&memory_key) {
                self.stats.lock().await.memory_hits += 1;
                return Ok(data.clone());
            }
        }

        let path = self.disk_path(storage, key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(path = %path.display(), "Disk cache hit");
                self.stats.lock().await.disk_hits += 1;
                Bytes::from(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let data = storage.get(key).await?;
                write_atomic(&path, &data).await?;
                {
                    let mut stats = self.stats.lock().await;
                    stats.misses += 1;
                    stats.bytes_fetched += data.len() as u64;
                }
                info!(size = data.len(), path = %path.display(), "Cached object");
                data
            }
            Err(e) => {
                return Err(CatalogError::CacheError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        self.remember(memory_key, data.clone()).await;
        Ok(data)
    }

    /// Make sure an object exists as a local file and return its path.
    ///
    /// Needed for readers that want a file rather than bytes (SQLite).
    pub async fn local_path(&self, storage: &ObjectStorage, key: &str) -> CatalogResult<PathBuf> {
        if storage.protocol() == Protocol::Local {
            return Ok(PathBuf::from(format!("/{}", key.trim_start_matches('/'))));
        }

        let path = self.disk_path(storage, key)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.stats.lock().await.disk_hits += 1;
            return Ok(path);
        }

        let data = storage.get(key).await?;
        write_atomic(&path, &data).await?;
        let mut stats = self.stats.lock().await;
        stats.misses += 1;
        stats.bytes_fetched += data.len() as u64;
        Ok(path)
    }

    async fn remember(&self, key: String, data: Bytes) {
        if data.len() > self.max_object_size {
            return;
        }
        let mut memory = self.memory.lock().await;
        // `push` also hands back the old value when `key` was already cached.
        if let Some((evicted, _)) = memory.push(key.clone(), data) {
            if evicted != key {
                self.stats.lock().await.evictions += 1;
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }

    /// Number of objects held in memory.
    pub async fn len(&self) -> usize {
        self.memory.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memory.lock().await.is_empty()
    }

    /// Drop the in-memory tier and reset statistics. Disk files are kept.
    pub async fn clear_memory(&self) {
        self.memory.lock().await.clear();
        *self.stats.lock().await = CacheStats::default();
    }
}

/// Write to a temporary sibling and rename, so readers never see a partial file.
async fn write_atomic(path: &Path, data: &[u8]) -> CatalogResult<()> {
    let cache_err = |e: std::io::Error| {
        CatalogError::CacheError(format!("Failed to write {}: {}", path.display(), e))
    };

    let parent = path
        .parent()
        .ok_or_else(|| CatalogError::CacheError(format!("no parent for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await.map_err(cache_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(
        ".{}.{}-{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp, data).await.map_err(cache_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(cache_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::{memory::InMemory, path::Path as StorePath, ObjectStore};
    use tempfile::TempDir;

    async fn remote_store() -> ObjectStorage {
        let store = Arc::new(InMemory::new());
        store
            .put(
                &StorePath::from("v0.1.0/hourly_emissions_epacems/epacems-2020-ID.parquet"),
                Bytes::from_static(b"PAR1 data PAR1"),
            )
            .await
            .unwrap();
        ObjectStorage::from_store(store, Protocol::Gs, "gs/intake.catalyst.coop")
    }

    #[tokio::test]
    async fn test_miss_then_hits() {
        let dir = TempDir::new().unwrap();
        let storage = remote_store().await;
        let cache = PartitionCache::new(dir.path(), 4).unwrap();
        let key = "v0.1.0/hourly_emissions_epacems/epacems-2020-ID.parquet";

        let first = cache.get_or_fetch(&storage, key).await.unwrap();
        let second = cache.get_or_fetch(&storage, key).await.unwrap();
        assert_eq!(first, second);

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.hit_rate(), 50.0);

        let on_disk = dir
            .path()
            .join("gs/intake.catalyst.coop")
            .join(key);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"PAR1 data PAR1");
    }

    #[tokio::test]
    async fn test_disk_tier_survives_memory_clear() {
        let dir = TempDir::new().unwrap();
        let storage = remote_store().await;
        let cache = PartitionCache::new(dir.path(), 4).unwrap();
        let key = "v0.1.0/hourly_emissions_epacems/epacems-2020-ID.parquet";

        cache.get_or_fetch(&storage, key).await.unwrap();
        cache.clear_memory().await;
        assert!(cache.is_empty().await);

        cache.get_or_fetch(&storage, key).await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let storage = remote_store().await;
        let cache = PartitionCache::new(dir.path(), 4).unwrap();

        let err = cache
            .get_or_fetch(&storage, "v0.1.0/missing.parquet")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!dir.path().join("gs/intake.catalyst.coop/v0.1.0/missing.parquet").exists());
    }

    #[tokio::test]
    async fn test_rejects_parent_segments() {
        let dir = TempDir::new().unwrap();
        let storage = remote_store().await;
        let cache = PartitionCache::new(dir.path(), 4).unwrap();
        assert!(cache.disk_path(&storage, "../../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_local_path_downloads_once() {
        let dir = TempDir::new().unwrap();
        let storage = remote_store().await;
        let cache = PartitionCache::new(dir.path(), 4).unwrap();
        let key = "v0.1.0/hourly_emissions_epacems/epacems-2020-ID.parquet";

        let path = cache.local_path(&storage, key).await.unwrap();
        assert!(path.starts_with(dir.path()));
        cache.local_path(&storage, key).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.disk_hits, 1);
    }

    #[tokio::test]
    async fn test_refetching_same_key_is_not_an_eviction() {
        let dir = TempDir::new().unwrap();
        let cache = PartitionCache::new(dir.path(), 1).unwrap();

        // Two concurrent misses for one key both end up in `remember`.
        cache.remember("gs/a".into(), Bytes::from_static(b"a")).await;
        cache.remember("gs/a".into(), Bytes::from_static(b"a")).await;
        assert_eq!(cache.stats().await.evictions, 0);
        assert_eq!(cache.len().await, 1);

        cache.remember("gs/b".into(), Bytes::from_static(b"b")).await;
        assert_eq!(cache.stats().await.evictions, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_large_objects_stay_on_disk() {
        let dir = TempDir::new().unwrap();
        let storage = remote_store().await;
        let cache = PartitionCache::new(dir.path(), 4)
            .unwrap()
            .with_max_object_size(4);
        let key = "v0.1.0/hourly_emissions_epacems/epacems-2020-ID.parquet";

        cache.get_or_fetch(&storage, key).await.unwrap();
        assert!(cache.is_empty().await);

        cache.get_or_fetch(&storage, key).await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_hits, 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(PartitionCache::new("/tmp/unused", 0).is_err());
    }
}
