//! Error types for the PUDL data catalog.

use thiserror::Error;

/// Result type alias using CatalogError.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Primary error type for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    // === Caller Errors ===
    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Catalog entry not found: {0}")]
    EntryNotFound(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    // === Catalog Description Errors ===
    #[error("Invalid catalog description: {0}")]
    InvalidCatalog(String),

    #[error("Required metadata field '{field}' missing from {entry}")]
    MissingMetadata { entry: String, field: String },

    // === Data Errors ===
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to read data: {0}")]
    DataReadError(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CatalogError {
    /// Shorthand for an invalid parameter error.
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// True when the error was caused by the caller rather than by storage or data.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CatalogError::InvalidParameter { .. }
                | CatalogError::EntryNotFound(_)
                | CatalogError::UnsupportedProtocol(_)
                | CatalogError::InvalidLocation(_)
        )
    }

    /// True when the requested object or catalog entry does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::NotFound(_) | CatalogError::EntryNotFound(_)
        )
    }
}

// Conversion from common error types
impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::InternalError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for CatalogError {
    fn from(err: serde_yaml::Error) -> Self {
        CatalogError::InvalidCatalog(format!("YAML error: {}", err))
    }
}
