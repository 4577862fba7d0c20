//! Offline synchronization engine for harbor.
//!
//! Lets a client keep reading and writing locally owned data while the
//! remote document store is unreachable, then reconciles once connectivity
//! returns.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Connectivity**: online/offline state and a debounced "became online" edge
//! - **Queue**: durable, ordered list of pending create/update/delete intents
//! - **Cache**: per-(owner, collection) mirror of what readers should see
//! - **Reconciler**: merges remote snapshots with the cache and queued intents
//! - **Processor**: single-flight drain of the queue against the remote store
//! - **Migrator**: re-keys cache and queue from a temporary identity to a permanent one
//! - **Engine**: wires the above together behind one shared handle
//!
//! ## Write path
//!
//! 1. `enqueue` persists the operation and applies it to the cache at once
//! 2. A debounced drain is scheduled if online
//! 3. The processor sends operations in enqueue order; successes leave the
//!    queue, failures are retried until the retry ceiling drops them
//!
//! ## Read path
//!
//! Readers only ever hit the local cache. Remote snapshots (pulls or live
//! subscriptions) pass through the reconciler first, so queued local intent
//! and client-preserved fields survive a stale or incomplete snapshot.
//!
//! # Example
//!
//! ```
//! use harbor_storage::MemoryKvStore;
//! use harbor_sync::remote::mock::MemoryRemoteStore;
//! use harbor_sync::{ConnectivityMonitor, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(MemoryRemoteStore::new()),
//!     Arc::new(ConnectivityMonitor::new(false, Duration::from_secs(1))),
//! );
//! assert!(!engine.is_online());
//! ```

mod cache;
mod config;
pub mod connectivity;
mod engine;
mod error;
mod http;
mod keys;
mod migrator;
mod processor;
mod queue;
mod reconciler;
pub mod remote;
mod sanitize;

pub use cache::{CachedCollection, LocalCache};
pub use config::{DEFAULT_MAX_RETRIES, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use http::{HttpProbe, HttpRemoteConfig, HttpRemoteStore, decode_value, encode_fields};
pub use migrator::{MigrationReport, NamespaceMigrator};
pub use processor::{DrainReport, QueueProcessor};
pub use queue::{DurableQueue, FailureOutcome};
pub use reconciler::Reconciler;
pub use remote::RemoteStore;
pub use sanitize::sanitize_payload;
