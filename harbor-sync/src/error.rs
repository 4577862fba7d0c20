//! Error types for the sync layer.

use harbor_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error talking to the remote store.
    #[error("network error: {0}")]
    Network(String),

    /// The remote store answered with an error status.
    #[error("remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The remote document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Local durable storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Identity migration could not be completed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request cannot be carried out in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SyncError::Timeout
    }
}
