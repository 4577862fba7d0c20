//! Durable key-value storage for harbor.
//!
//! The sync engine persists one serialized queue blob and one serialized
//! cache blob per `(collection, owner)` in a flat string key-value store.
//! This crate provides that store:
//!
//! - [`KeyValueStore`]: the async trait the engine talks to
//! - [`SqliteKvStore`]: a single-table SQLite backend for devices
//! - [`MemoryKvStore`]: an in-process backend for tests and ephemeral sessions
//!
//! Multi-key changes go through [`WriteBatch`], which every backend applies
//! atomically.

mod error;
mod kv;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use kv::{KeyValueStore, KvWrite, WriteBatch};
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
