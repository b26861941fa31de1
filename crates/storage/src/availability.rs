//! Checks that the published catalog files exist in a store.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use catalog_common::{CatalogResult, Protocol};

use crate::object_store::ObjectStorage;

/// Files every published catalog version is expected to contain, relative to
/// the version prefix.
pub const EXPECTED_FILES: &[&str] = &[
    "censusdp1tract.sqlite",
    "ferc1.sqlite",
    "pudl.sqlite",
    "hourly_emissions_epacems.parquet",
    "hourly_emissions_epacems/epacems-2020-NY.parquet",
    "hourly_emissions_epacems/epacems-2020-CA.parquet",
    "hourly_emissions_epacems/epacems-2020-TX.parquet",
    "hourly_emissions_epacems/epacems-2020-FL.parquet",
];

/// How existence is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMethod {
    /// One metadata request per file.
    Head,
    /// A single listing of the prefix.
    Listing,
}

impl CheckMethod {
    /// S3 is read unsigned, where listing is cheaper than many HEADs.
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::S3 => CheckMethod::Listing,
            _ => CheckMethod::Head,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub name: String,
    pub key: String,
    pub exists: bool,
    /// Known only for HEAD checks.
    pub size: Option<usize>,
}

/// Report which of `names` exist under `prefix`.
pub async fn check_files(
    storage: &ObjectStorage,
    prefix: &str,
    names: &[&str],
    method: CheckMethod,
) -> CatalogResult<Vec<FileStatus>> {
    let prefix = prefix.trim_matches('/');
    let key_for = |name: &str| match prefix.is_empty() {
        true => name.to_string(),
        false => format!("{}/{}", prefix, name),
    };

    let mut statuses = Vec::with_capacity(names.len());
    match method {
        CheckMethod::Head => {
            for name in names {
                let key = key_for(name);
                let (exists, size) = match storage.size(&key).await {
                    Ok(size) => (true, Some(size)),
                    Err(e) if e.is_not_found() => (false, None),
                    Err(e) => return Err(e),
                };
                statuses.push(FileStatus {
                    name: name.to_string(),
                    key,
                    exists,
                    size,
                });
            }
        }
        CheckMethod::Listing => {
            let listed: HashSet<String> = storage.list(prefix).await?.into_iter().collect();
            for name in names {
                let key = key_for(name);
                statuses.push(FileStatus {
                    name: name.to_string(),
                    exists: listed.contains(&key),
                    key,
                    size: None,
                });
            }
        }
    }

    let missing = statuses.iter().filter(|s| !s.exists).count();
    if missing > 0 {
        warn!(store = storage.store_id(), prefix, missing, "Catalog files missing");
    } else {
        info!(store = storage.store_id(), prefix, checked = statuses.len(), "All catalog files present");
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::{memory::InMemory, path::Path, ObjectStore};
    use std::sync::Arc;

    async fn store_with(keys: &[&str]) -> ObjectStorage {
        let store = Arc::new(InMemory::new());
        for key in keys {
            store
                .put(&Path::from(*key), Bytes::from_static(b"data"))
                .await
                .unwrap();
        }
        ObjectStorage::from_store(store, Protocol::S3, "s3/intake.catalyst.coop")
    }

    #[tokio::test]
    async fn test_head_and_listing_agree() {
        let storage = store_with(&["v0.1.0/pudl.sqlite", "v0.1.0/ferc1.sqlite"]).await;
        let names = ["pudl.sqlite", "ferc1.sqlite", "censusdp1tract.sqlite"];

        for method in [CheckMethod::Head, CheckMethod::Listing] {
            let statuses = check_files(&storage, "v0.1.0/", &names, method).await.unwrap();
            let exists: Vec<bool> = statuses.iter().map(|s| s.exists).collect();
            assert_eq!(exists, vec![true, true, false], "{:?}", method);
            assert_eq!(statuses[0].key, "v0.1.0/pudl.sqlite");
        }
    }

    #[tokio::test]
    async fn test_head_reports_size() {
        let storage = store_with(&["pudl.sqlite"]).await;
        let statuses = check_files(&storage, "", &["pudl.sqlite"], CheckMethod::Head)
            .await
            .unwrap();
        assert_eq!(statuses[0].size, Some(4));
    }

    #[test]
    fn test_method_for_protocol() {
        assert_eq!(CheckMethod::for_protocol(Protocol::S3), CheckMethod::Listing);
        assert_eq!(CheckMethod::for_protocol(Protocol::Gs), CheckMethod::Head);
        assert_eq!(CheckMethod::for_protocol(Protocol::Https), CheckMethod::Head);
    }
}
