//! Core type definitions for harbor.
//!
//! This crate defines the fundamental types shared by the storage layer and
//! the sync engine:
//! - Operation, owner and document identifiers
//! - The closed [`Value`] model used for document fields and payloads
//! - Documents, queued operations and queue statistics
//! - Per-collection schemas (client-preserved fields, time-valued fields)
//!
//! Domain-specific document shapes belong to the consumers of the engine,
//! not here.

mod document;
mod ids;
mod operation;
mod schema;
pub mod time;
mod value;

pub use document::Document;
pub use ids::{DocumentId, OperationId, OwnerId, TEMPORARY_ID_PREFIX};
pub use operation::{Operation, OperationKind, OperationStatus, QueueStats};
pub use schema::{CollectionSchema, SchemaRegistry, DEFAULT_ARCHIVE_FIELD};
pub use value::{Fields, Value};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}
