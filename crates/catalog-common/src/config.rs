//! Catalog configuration.
//!
//! Two settings come from the environment:
//! - `PUDL_INTAKE_PATH`: root location that catalog paths are resolved against
//! - `PUDL_INTAKE_CACHE`: local directory for cached downloads
//!
//! Both are read once by [`CatalogConfig::from_env`] and the resulting value
//! is passed explicitly to whatever needs it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CatalogError, CatalogResult};

/// Environment variable holding the root location of the catalog data.
pub const INTAKE_PATH_VAR: &str = "PUDL_INTAKE_PATH";

/// Environment variable holding the local cache directory.
pub const INTAKE_CACHE_VAR: &str = "PUDL_INTAKE_CACHE";

/// Bucket the catalog data is published to (same name on GCS and S3).
pub const INTAKE_BUCKET: &str = "intake.catalyst.coop";

/// Published catalog version; a path prefix inside the bucket.
pub const CATALOG_VERSION: &str = "v0.1.0";

/// Access protocol for catalog data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Google Cloud Storage (`gs://` or `gcs://`)
    Gs,
    /// Amazon S3, read anonymously (`s3://`)
    S3,
    /// Plain HTTP(S) mirror. Cannot list directories.
    Https,
    /// Local filesystem (`file://` or a bare path)
    Local,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Gs => "gs",
            Protocol::S3 => "s3",
            Protocol::Https => "https",
            Protocol::Local => "local",
        }
    }

    /// Map a URL scheme to a protocol.
    pub fn from_scheme(scheme: &str) -> CatalogResult<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "gs" | "gcs" => Ok(Protocol::Gs),
            "s3" => Ok(Protocol::S3),
            "http" | "https" => Ok(Protocol::Https),
            "file" => Ok(Protocol::Local),
            other => Err(CatalogError::UnsupportedProtocol(other.to_string())),
        }
    }

    /// Published base URL for this protocol, if the catalog is mirrored there.
    pub fn base_url(self) -> Option<String> {
        match self {
            Protocol::Gs => Some(format!("gs://{}/{}", INTAKE_BUCKET, CATALOG_VERSION)),
            Protocol::S3 => Some(format!("s3://{}/{}", INTAKE_BUCKET, CATALOG_VERSION)),
            Protocol::Https => Some(format!(
                "https://storage.googleapis.com/{}/{}",
                INTAKE_BUCKET, CATALOG_VERSION
            )),
            Protocol::Local => None,
        }
    }

    /// Whether objects can be listed by prefix over this protocol.
    pub fn supports_listing(self) -> bool {
        !matches!(self, Protocol::Https)
    }
}

impl FromStr for Protocol {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Protocol::Local),
            other => Protocol::from_scheme(other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build `<base>/<table>.parquet`, or `<base>/<table>` for a partitioned table.
pub fn parquet_url(protocol: Protocol, partitioned: bool, table_name: &str) -> CatalogResult<String> {
    let base = protocol.base_url().ok_or_else(|| {
        CatalogError::invalid_parameter(
            "protocol",
            format!("no published base URL for {}; must be one of gs, s3, https", protocol),
        )
    })?;
    let mut url = format!("{}/{}", base, table_name);
    if !partitioned {
        url.push_str(".parquet");
    }
    Ok(url)
}

/// Catalog-wide settings, constructed once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root location catalog paths are resolved against.
    pub intake_path: String,
    /// Local directory for cached downloads.
    pub cache_dir: PathBuf,
}

impl CatalogConfig {
    pub fn new(intake_path: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            intake_path: intake_path.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through a lookup function, warning about and defaulting
    /// any that are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let intake_path = match get(INTAKE_PATH_VAR) {
            Some(path) => path,
            None => {
                let default = default_intake_path();
                warn!(
                    var = INTAKE_PATH_VAR,
                    default = %default,
                    "Environment variable not set, using default"
                );
                default
            }
        };

        let cache_dir = match get(INTAKE_CACHE_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let default = default_cache_dir(get("HOME"));
                warn!(
                    var = INTAKE_CACHE_VAR,
                    default = %default.display(),
                    "Environment variable not set, using default"
                );
                default
            }
        };

        Self {
            intake_path,
            cache_dir,
        }
    }

    /// Point the catalog at the published mirror for `protocol`.
    pub fn for_protocol(mut self, protocol: Protocol) -> CatalogResult<Self> {
        self.intake_path = protocol.base_url().ok_or_else(|| {
            CatalogError::invalid_parameter("protocol", format!("no published mirror for {}", protocol))
        })?;
        Ok(self)
    }

    pub fn with_intake_path(mut self, intake_path: impl Into<String>) -> Self {
        self.intake_path = intake_path.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Variables available to `${VAR}` substitution in catalog descriptions.
    pub fn template_vars(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                INTAKE_PATH_VAR.to_string(),
                self.intake_path.trim_end_matches('/').to_string(),
            ),
            (
                INTAKE_CACHE_VAR.to_string(),
                self.cache_dir.to_string_lossy().into_owned(),
            ),
        ])
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            intake_path: default_intake_path(),
            cache_dir: default_cache_dir(std::env::var("HOME").ok()),
        }
    }
}

fn default_intake_path() -> String {
    format!("gs://{}/{}", INTAKE_BUCKET, CATALOG_VERSION)
}

fn default_cache_dir(home: Option<String>) -> PathBuf {
    home.map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".intake")
        .join("cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = CatalogConfig::from_lookup(|key| match key {
            "HOME" => Some("/home/pudl".to_string()),
            _ => None,
        });
        assert_eq!(config.intake_path, "gs://intake.catalyst.coop/v0.1.0");
        assert_eq!(config.cache_dir, PathBuf::from("/home/pudl/.intake/cache"));
    }

    #[test]
    fn test_env_overrides() {
        let config = CatalogConfig::from_lookup(|key| match key {
            INTAKE_PATH_VAR => Some("/data/pudl".to_string()),
            INTAKE_CACHE_VAR => Some("/tmp/cache".to_string()),
            _ => None,
        });
        assert_eq!(config.intake_path, "/data/pudl");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cache"));
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let config = CatalogConfig::from_lookup(|key| match key {
            INTAKE_PATH_VAR => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.intake_path, "gs://intake.catalyst.coop/v0.1.0");
    }

    #[test]
    fn test_for_protocol() {
        let config = CatalogConfig::new("/data", "/cache")
            .for_protocol(Protocol::Https)
            .unwrap();
        assert_eq!(
            config.intake_path,
            "https://storage.googleapis.com/intake.catalyst.coop/v0.1.0"
        );
        assert!(CatalogConfig::new("/data", "/cache")
            .for_protocol(Protocol::Local)
            .is_err());
    }

    #[test]
    fn test_template_vars_trim_trailing_slash() {
        let vars = CatalogConfig::new("gs://bucket/v1/", "/cache").template_vars();
        assert_eq!(vars[INTAKE_PATH_VAR], "gs://bucket/v1");
    }

    #[test]
    fn test_parquet_url() {
        assert_eq!(
            parquet_url(Protocol::Gs, false, "hourly_emissions_epacems").unwrap(),
            "gs://intake.catalyst.coop/v0.1.0/hourly_emissions_epacems.parquet"
        );
        assert_eq!(
            parquet_url(Protocol::Gs, true, "hourly_emissions_epacems").unwrap(),
            "gs://intake.catalyst.coop/v0.1.0/hourly_emissions_epacems"
        );
        assert!(parquet_url(Protocol::Local, false, "hourly_emissions_epacems").is_err());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("gcs".parse::<Protocol>().unwrap(), Protocol::Gs);
        assert_eq!("HTTPS".parse::<Protocol>().unwrap(), Protocol::Https);
        assert_eq!("local".parse::<Protocol>().unwrap(), Protocol::Local);
        assert!("ftp".parse::<Protocol>().is_err());
        assert!(!Protocol::Https.supports_listing());
    }
}
