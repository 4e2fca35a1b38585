//! Error types for slipway-store

use thiserror::Error;

/// Errors that can occur in the blob storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key not present in the store
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    /// Key contains characters the backend cannot represent
    #[error("Invalid blob key: {key}")]
    InvalidKey { key: String },

    /// Underlying filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure
    #[error("Storage backend failed: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
