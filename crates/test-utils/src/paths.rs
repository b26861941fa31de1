//! Path utilities for locating test data files.
//!
//! Real catalog files (`pudl.sqlite`, EPA CEMS extracts) are too large to
//! commit. Tests that want them look in `TEST_DATA_DIR` and the workspace
//! `testdata/` directory and skip when they are absent.

use std::path::PathBuf;

/// Returns the workspace root directory.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Searches for a test file.
///
/// Checked in order:
/// 1. `$TEST_DATA_DIR/{name}`
/// 2. `$PUDL_INTAKE_PATH/{name}`, when that is a local directory
/// 3. `testdata/{name}` at the workspace root
pub fn find_test_file(name: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(test_data_dir) = std::env::var("TEST_DATA_DIR") {
        candidates.push(PathBuf::from(test_data_dir).join(name));
    }
    if let Ok(intake_path) = std::env::var("PUDL_INTAKE_PATH") {
        if !intake_path.contains("://") {
            candidates.push(PathBuf::from(intake_path).join(name));
        }
    }
    candidates.push(workspace_root().join("testdata").join(name));

    candidates.into_iter().find(|path| path.exists())
}

/// Creates a temporary directory, removed when the returned `TempDir` drops.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_is_valid() {
        let root = workspace_root();
        assert!(
            root.join("Cargo.toml").exists(),
            "Workspace root should contain Cargo.toml: {:?}",
            root
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(find_test_file("definitely-not-here.sqlite").is_none());
    }
}
