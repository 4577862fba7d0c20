//! Moving cached data and queued operations from one identity to another.
//!
//! Used when a temporary identity (or the anonymous namespace) is replaced
//! by a permanent one. The migrator waits for any running drain, holds the
//! cache and queue write locks, and commits every key move as one atomic
//! batch: after `migrate` returns, nothing is visible under both ids.

use crate::cache::{CachedCollection, LocalCache, normalize_items};
use crate::error::SyncResult;
use crate::queue::{self, DurableQueue};
use chrono::Utc;
use harbor_storage::WriteBatch;
use harbor_types::{Fields, OwnerId, Value};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a migration moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub collections: usize,
    pub documents: usize,
    pub operations: usize,
}

/// The namespace migrator.
pub struct NamespaceMigrator {
    queue: Arc<DurableQueue>,
    cache: Arc<LocalCache>,
    drain_lock: Arc<Mutex<()>>,
}

impl NamespaceMigrator {
    /// `drain_lock` is the processor's; holding it keeps drains out while
    /// keys move.
    pub fn new(queue: Arc<DurableQueue>, cache: Arc<LocalCache>, drain_lock: Arc<Mutex<()>>) -> Self {
        Self {
            queue,
            cache,
            drain_lock,
        }
    }

    /// Re-keys every cached collection and queued operation of `from` to `to`.
    /// `from = None` is the anonymous namespace.
    ///
    /// Cached collections already present under `to` are merged by document
    /// id, the migrated copy winning. Owner fields naming `from` inside
    /// documents and payloads are rewritten to `to`. A source collection
    /// holding documents of a third owner is dropped, not moved.
    pub async fn migrate(&self, from: Option<&OwnerId>, to: &OwnerId) -> SyncResult<MigrationReport> {
        if from == Some(to) {
            return Ok(MigrationReport::default());
        }

        let _drain = self.drain_lock.lock().await;
        let _cache = self.cache.lock().await;
        let _queue = self.queue.lock().await;

        let kv = self.cache.kv();
        let keys = self.cache.keys();
        let owner_fields = self.cache.owner_fields();
        let mut batch = WriteBatch::new();
        let mut report = MigrationReport::default();

        for key in kv.keys_with_prefix(&keys.cache_owner_prefix(from)).await? {
            let Some(mut source) = self.cache.read(&key).await? else {
                batch.remove(key);
                continue;
            };
            if self.cache.leaks_other_owner(&source, from) {
                warn!("Cache {} holds documents of another owner, dropping it", key);
                batch.remove(key);
                continue;
            }
            if let Some(from) = from {
                for doc in &mut source.items {
                    rewrite_owner(&mut doc.fields, owner_fields, from, to);
                }
            }

            let dest_key = keys.cache(Some(to), &source.collection);
            let existing = match self.cache.read(&dest_key).await? {
                Some(dest) if !self.cache.leaks_other_owner(&dest, Some(to)) => Some(dest),
                _ => None,
            };

            report.collections += 1;
            report.documents += source.items.len();
            debug!("Moving {} items of {} to {}", source.items.len(), source.collection, to);

            let mut items = existing.as_ref().map(|d| d.items.clone()).unwrap_or_default();
            items.extend(source.items);
            let moved = CachedCollection {
                owner_id: Some(to.clone()),
                items: normalize_items(items, self.cache.schema_for(&source.collection)),
                cached_at: Utc::now(),
                last_synced_at: source
                    .last_synced_at
                    .or_else(|| existing.and_then(|d| d.last_synced_at)),
                collection: source.collection,
            };
            batch.set(dest_key, serde_json::to_string(&moved)?);
            batch.remove(key);
        }

        let mut ops = self.queue.read_ops().await?;
        for op in ops.iter_mut().filter(|op| op.belongs_to(from)) {
            op.owner_id = Some(to.clone());
            if let Some(from) = from {
                rewrite_owner(&mut op.payload, owner_fields, from, to);
            }
            report.operations += 1;
        }
        if report.operations > 0 {
            batch.set(self.queue.key(), queue::encode(&ops)?);
        }

        kv.apply_batch(batch).await?;
        self.queue.publish(&ops);

        info!(
            "Migrated {} collections ({} documents) and {} operations from {} to {}",
            report.collections,
            report.documents,
            report.operations,
            from.map_or("anonymous", OwnerId::as_str),
            to
        );
        Ok(report)
    }
}

fn rewrite_owner(fields: &mut Fields, owner_fields: &[String], from: &OwnerId, to: &OwnerId) {
    for field in owner_fields {
        if let Some(value) = fields.get_mut(field)
            && value.as_str() == Some(from.as_str())
        {
            *value = Value::String(to.to_string());
        }
    }
}

impl std::fmt::Debug for NamespaceMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceMigrator").finish_non_exhaustive()
    }
}
