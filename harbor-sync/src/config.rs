//! Engine configuration.

use crate::error::{SyncError, SyncResult};
use harbor_types::{CollectionSchema, SchemaRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum number of failed remote attempts before an operation is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Retry ceiling for failed operations.
    pub max_retries: u32,
    /// Delay between an enqueue and the drain it schedules (ms).
    pub drain_debounce_ms: u64,
    /// Delay between regaining connectivity and draining (ms).
    pub reconnect_delay_ms: u64,
    /// Bound on each remote write during a drain (ms).
    pub request_timeout_ms: u64,
    /// Bound on remote reads: pulls and existence probes (ms).
    pub read_timeout_ms: u64,
    /// Payload fields starting with this prefix never leave the device.
    pub local_field_prefix: String,
    /// Document id prefixes marking ids minted on the device.
    pub temp_id_prefixes: Vec<String>,
    /// Document fields naming the owning identity.
    pub owner_fields: Vec<String>,
    /// Namespace for every key written to durable storage.
    pub key_prefix: String,
    /// Per-collection schemas.
    pub schemas: Vec<CollectionSchema>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            drain_debounce_ms: 500,
            reconnect_delay_ms: 1_000,
            request_timeout_ms: 15_000,
            read_timeout_ms: 5_000,
            local_field_prefix: "_".to_string(),
            temp_id_prefixes: vec!["local_".to_string(), "temp_".to_string()],
            owner_fields: vec!["userId".to_string(), "ownerId".to_string()],
            key_prefix: "harbor".to_string(),
            schemas: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))
    }

    /// Adds a collection schema.
    #[must_use]
    pub fn with_schema(mut self, schema: CollectionSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Builds the schema registry from the configured schemas.
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        for schema in &self.schemas {
            registry.register(schema.clone());
        }
        registry
    }

    pub fn drain_debounce(&self) -> Duration {
        Duration::from_millis(self.drain_debounce_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
