//! Shared test utilities for the PUDL catalog workspace.
//!
//! This crate provides:
//! - Test data path helpers
//! - Skip macros for optional test data
//! - Synthetic EPA CEMS generators
//! - Parquet fixtures in every supported layout
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! ```ignore
//! use test_utils::{require_test_file, fixtures};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Skip a test if the required file is not found.
///
/// ```ignore
/// use test_utils::require_test_file;
///
/// #[tokio::test]
/// async fn test_pudl_tables() {
///     let path = require_test_file!("pudl.sqlite");
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!(
                    "SKIPPED: Test file '{}' not found. Download catalog data or set TEST_DATA_DIR.",
                    $name
                );
                return;
            }
        }
    }};
}

/// Approximate floating-point equality.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(2020.0001, 2020.0, 0.001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(2020.1, 2020.0, 0.001);
    }

    #[test]
    fn test_require_test_file_skips() {
        let mut ran = false;
        let mut body = || {
            let _path = require_test_file!("definitely-not-here.parquet");
            ran = true;
        };
        body();
        assert!(!ran);
    }
}
