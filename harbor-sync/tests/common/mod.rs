//! Shared test helpers for sync tests.

#![allow(dead_code)]

use harbor_storage::MemoryKvStore;
use harbor_sync::remote::mock::MemoryRemoteStore;
use harbor_sync::{ConnectivityMonitor, SyncConfig, SyncEngine};
use harbor_types::{CollectionSchema, Document, Fields, OwnerId, Value};
use std::sync::Arc;
use std::time::Duration;

pub const ITEMS: &str = "items";

pub fn owner(id: &str) -> OwnerId {
    OwnerId::new(id)
}

/// Builds a field map from a JSON object literal.
pub fn fields(json: serde_json::Value) -> Fields {
    match Value::from(json) {
        Value::Map(map) => map,
        other => panic!("expected a JSON object, got {other:?}"),
    }
}

/// Builds a document from a JSON object literal holding an `id`.
pub fn doc(json: serde_json::Value) -> Document {
    Document::from_json(&json.to_string()).unwrap()
}

/// Config with an `items` schema preserving `currentAlarmId` and a `dueAt`
/// time field.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_schema(
        CollectionSchema::new(ITEMS)
            .preserve("currentAlarmId")
            .time_field("dueAt"),
    )
}

pub struct Harness {
    pub engine: SyncEngine,
    pub kv: Arc<MemoryKvStore>,
    pub remote: Arc<MemoryRemoteStore>,
    pub connectivity: Arc<ConnectivityMonitor>,
}

pub fn harness(online: bool) -> Harness {
    harness_with(test_config(), online)
}

pub fn harness_with(config: SyncConfig, online: bool) -> Harness {
    let kv = Arc::new(MemoryKvStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let connectivity = Arc::new(ConnectivityMonitor::new(
        online,
        Duration::from_millis(config.reconnect_delay_ms),
    ));
    let engine = SyncEngine::new(config, kv.clone(), remote.clone(), connectivity.clone());
    Harness {
        engine,
        kv,
        remote,
        connectivity,
    }
}

/// Ids of a document list, in order.
pub fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter().map(|d| d.id.to_string()).collect()
}
