//! Object storage interface for catalog data (GCS, S3, HTTPS mirrors, local disk).

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, http::HttpBuilder,
    local::LocalFileSystem, path::Path, ObjectStore,
};
use tracing::{debug, instrument};
use url::Url;

use catalog_common::{CatalogError, CatalogResult, Protocol};

/// A parsed data location: which store to talk to and the key within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub protocol: Protocol,
    /// Bucket for GCS/S3, `scheme://host[:port]` for HTTP(S), `None` for local paths.
    pub authority: Option<String>,
    /// Key within the store, without a leading slash.
    pub path: String,
}

impl StorageLocation {
    /// Parse a URL (`gs://bucket/key`, `s3://...`, `https://host/key`,
    /// `file:///abs/path`) or a bare filesystem path.
    pub fn parse(location: &str) -> CatalogResult<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(CatalogError::InvalidLocation("empty location".to_string()));
        }

        if !location.contains("://") {
            return Self::local(PathBuf::from(location));
        }

        let url = Url::parse(location)
            .map_err(|e| CatalogError::InvalidLocation(format!("{}: {}", location, e)))?;
        let protocol = Protocol::from_scheme(url.scheme())?;

        match protocol {
            Protocol::Local => {
                let path = url.to_file_path().map_err(|_| {
                    CatalogError::InvalidLocation(format!("not a local file URL: {}", location))
                })?;
                Self::local(path)
            }
            Protocol::Gs | Protocol::S3 => {
                let bucket = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
                    CatalogError::InvalidLocation(format!("missing bucket in {}", location))
                })?;
                Ok(Self {
                    protocol,
                    authority: Some(bucket.to_string()),
                    path: trim_key(url.path()),
                })
            }
            Protocol::Https => {
                let host = url.host_str().ok_or_else(|| {
                    CatalogError::InvalidLocation(format!("missing host in {}", location))
                })?;
                let authority = match url.port() {
                    Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                    None => format!("{}://{}", url.scheme(), host),
                };
                Ok(Self {
                    protocol,
                    authority: Some(authority),
                    path: trim_key(url.path()),
                })
            }
        }
    }

    fn local(path: PathBuf) -> CatalogResult<Self> {
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Self {
            protocol: Protocol::Local,
            authority: None,
            path: trim_key(&absolute.to_string_lossy()),
        })
    }

    /// Append path segments to this location.
    pub fn join(&self, child: &str) -> Self {
        let child = child.trim_matches('/');
        let path = match (self.path.is_empty(), child.is_empty()) {
            (_, true) => self.path.clone(),
            (true, false) => child.to_string(),
            (false, false) => format!("{}/{}", self.path, child),
        };
        Self {
            protocol: self.protocol,
            authority: self.authority.clone(),
            path,
        }
    }

    /// Last path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Stable identifier of the store, used to namespace cache entries.
    pub fn store_id(&self) -> String {
        match &self.authority {
            Some(authority) => format!(
                "{}/{}",
                self.protocol,
                authority
                    .split("://")
                    .last()
                    .unwrap_or(authority)
                    .replace(':', "_")
            ),
            None => self.protocol.to_string(),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.protocol, &self.authority) {
            (Protocol::Local, _) | (_, None) => write!(f, "/{}", self.path),
            (Protocol::Https, Some(authority)) => write!(f, "{}/{}", authority, self.path),
            (protocol, Some(bucket)) => write!(f, "{}://{}/{}", protocol, bucket, self.path),
        }
    }
}

fn trim_key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Object storage client bound to one store (bucket, host or filesystem).
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    protocol: Protocol,
    store_id: String,
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("protocol", &self.protocol)
            .field("store_id", &self.store_id)
            .finish()
    }
}

impl ObjectStorage {
    /// Create a client for the store that `location` lives in.
    ///
    /// GCS credentials are taken from the environment the way
    /// `object_store` does; S3 is read anonymously.
    pub fn connect(location: &StorageLocation) -> CatalogResult<Self> {
        let authority = location.authority.as_deref();
        let store: Arc<dyn ObjectStore> = match (location.protocol, authority) {
            (Protocol::Gs, Some(bucket)) => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| {
                        CatalogError::StorageError(format!("Failed to create GCS client: {}", e))
                    })?,
            ),
            (Protocol::S3, Some(bucket)) => Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_region(
                        std::env::var("AWS_REGION").unwrap_or_else(|_| "us-west-2".to_string()),
                    )
                    .with_skip_signature(true)
                    .build()
                    .map_err(|e| {
                        CatalogError::StorageError(format!("Failed to create S3 client: {}", e))
                    })?,
            ),
            (Protocol::Https, Some(base_url)) => Arc::new(
                HttpBuilder::new().with_url(base_url).build().map_err(|e| {
                    CatalogError::StorageError(format!("Failed to create HTTP client: {}", e))
                })?,
            ),
            (Protocol::Local, _) => Arc::new(LocalFileSystem::new()),
            (protocol, None) => {
                return Err(CatalogError::InvalidLocation(format!(
                    "{} location requires a bucket or host",
                    protocol
                )))
            }
        };

        Ok(Self::from_store(store, location.protocol, location.store_id()))
    }

    /// Parse `url` and connect to its store. Returns the client and the key.
    pub fn for_location(url: &str) -> CatalogResult<(Self, String)> {
        let location = StorageLocation::parse(url)?;
        let storage = Self::connect(&location)?;
        Ok((storage, location.path))
    }

    /// Wrap an existing store, e.g. `object_store::memory::InMemory` in tests.
    pub fn from_store(
        store: Arc<dyn ObjectStore>,
        protocol: Protocol,
        store_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            protocol,
            store_id: store_id.into(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Read a whole object.
    #[instrument(skip(self), fields(store = %self.store_id, path = %path))]
    pub async fn get(&self, path: &str) -> CatalogResult<Bytes> {
        let location = Path::from(path);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(path, "read", e))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| map_store_error(path, "read", e))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Read a byte range from an object.
    #[instrument(skip(self), fields(store = %self.store_id, path = %path))]
    pub async fn get_range(&self, path: &str, range: Range<usize>) -> CatalogResult<Bytes> {
        let location = Path::from(path);

        self.store
            .get_range(&location, range)
            .await
            .map_err(|e| map_store_error(path, "read range of", e))
    }

    /// Read several byte ranges from an object; the store may coalesce them.
    #[instrument(skip(self, ranges), fields(store = %self.store_id, path = %path, ranges = ranges.len()))]
    pub async fn get_ranges(&self, path: &str, ranges: &[Range<usize>]) -> CatalogResult<Vec<Bytes>> {
        let location = Path::from(path);

        self.store
            .get_ranges(&location, ranges)
            .await
            .map_err(|e| map_store_error(path, "read ranges of", e))
    }

    /// Size of an object in bytes.
    pub async fn size(&self, path: &str) -> CatalogResult<usize> {
        let location = Path::from(path);

        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| map_store_error(path, "stat", e))?;

        Ok(meta.size)
    }

    /// Check if an object exists.
    pub async fn exists(&self, path: &str) -> CatalogResult<bool> {
        let location = Path::from(path);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error(path, "check", e)),
        }
    }

    /// List objects under a prefix, sorted by key.
    ///
    /// Plain HTTPS mirrors cannot list directories; the store's error is
    /// returned as-is.
    #[instrument(skip(self), fields(store = %self.store_id, prefix = %prefix))]
    pub async fn list(&self, prefix: &str) -> CatalogResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let mut paths = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| CatalogError::StorageError(format!("List of {} failed: {}", prefix, e)))?
        {
            paths.push(meta.location.to_string());
        }

        paths.sort();
        debug!(count = paths.len(), "Listed objects");
        Ok(paths)
    }
}

fn map_store_error(path: &str, action: &str, err: object_store::Error) -> CatalogError {
    match err {
        object_store::Error::NotFound { .. } => CatalogError::NotFound(path.to_string()),
        e => CatalogError::StorageError(format!("Failed to {} {}: {}", action, path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn test_parse_gs() {
        let loc = StorageLocation::parse("gs://intake.catalyst.coop/v0.1.0/pudl.sqlite").unwrap();
        assert_eq!(loc.protocol, Protocol::Gs);
        assert_eq!(loc.authority.as_deref(), Some("intake.catalyst.coop"));
        assert_eq!(loc.path, "v0.1.0/pudl.sqlite");
        assert_eq!(loc.to_string(), "gs://intake.catalyst.coop/v0.1.0/pudl.sqlite");
    }

    #[test]
    fn test_parse_gcs_alias() {
        let loc = StorageLocation::parse("gcs://catalyst.coop/intake/test").unwrap();
        assert_eq!(loc.protocol, Protocol::Gs);
        assert_eq!(loc.path, "intake/test");
    }

    #[test]
    fn test_parse_https() {
        let loc = StorageLocation::parse(
            "https://storage.googleapis.com/intake.catalyst.coop/v0.1.0/hourly_emissions_epacems.parquet",
        )
        .unwrap();
        assert_eq!(loc.protocol, Protocol::Https);
        assert_eq!(loc.authority.as_deref(), Some("https://storage.googleapis.com"));
        assert_eq!(
            loc.path,
            "intake.catalyst.coop/v0.1.0/hourly_emissions_epacems.parquet"
        );
        assert_eq!(loc.store_id(), "https/storage.googleapis.com");
    }

    #[test]
    fn test_parse_local() {
        let loc = StorageLocation::parse("/data/pudl/pudl.sqlite").unwrap();
        assert_eq!(loc.protocol, Protocol::Local);
        assert_eq!(loc.authority, None);
        assert_eq!(loc.path, "data/pudl/pudl.sqlite");
        assert_eq!(loc.to_string(), "/data/pudl/pudl.sqlite");

        let file_url = StorageLocation::parse("file:///data/pudl/pudl.sqlite").unwrap();
        assert_eq!(file_url, loc);
    }

    #[test]
    fn test_parse_errors() {
        assert!(StorageLocation::parse("").is_err());
        assert!(matches!(
            StorageLocation::parse("ftp://host/file"),
            Err(CatalogError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_join_and_file_name() {
        let base = StorageLocation::parse("gs://intake.catalyst.coop/v0.1.0/").unwrap();
        let file = base.join("hourly_emissions_epacems/epacems-2020-NY.parquet");
        assert_eq!(
            file.path,
            "v0.1.0/hourly_emissions_epacems/epacems-2020-NY.parquet"
        );
        assert_eq!(file.file_name(), Some("epacems-2020-NY.parquet"));
        assert_eq!(base.join("").path, "v0.1.0");
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = Arc::new(InMemory::new());
        store
            .put(&Path::from("v0.1.0/pudl.sqlite"), Bytes::from_static(b"SQLite").into())
            .await
            .unwrap();
        let storage = ObjectStorage::from_store(store, Protocol::Local, "memory");

        assert!(storage.exists("v0.1.0/pudl.sqlite").await.unwrap());
        assert!(!storage.exists("v0.1.0/ferc1.sqlite").await.unwrap());
        assert_eq!(storage.size("v0.1.0/pudl.sqlite").await.unwrap(), 6);
        assert_eq!(
            storage.get_range("v0.1.0/pudl.sqlite", 0..3).await.unwrap(),
            Bytes::from_static(b"SQL")
        );
        assert_eq!(
            storage
                .get_ranges("v0.1.0/pudl.sqlite", &[0..1, 3..6])
                .await
                .unwrap(),
            vec![Bytes::from_static(b"S"), Bytes::from_static(b"ite")]
        );
        assert_eq!(
            storage.list("v0.1.0").await.unwrap(),
            vec!["v0.1.0/pudl.sqlite".to_string()]
        );

        let err = storage.get("v0.1.0/ferc1.sqlite").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
