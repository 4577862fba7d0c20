//! Durable, ordered queue of pending write intents.
//!
//! The whole queue is persisted as one JSON array under a single key. Every
//! mutation is a read-modify-write under the queue's write lock, so
//! concurrent callers inside the process cannot lose each other's updates.
//! After each mutation the new [`QueueStats`] are pushed to subscribers.

use crate::error::{SyncError, SyncResult};
use crate::keys::KeySpace;
use harbor_storage::KeyValueStore;
use harbor_types::{Operation, OperationId, OperationStatus, OwnerId, QueueStats};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, error, warn};

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Marked FAILED, will be retried by a later drain.
    Retry { retry_count: u32 },
    /// Hit the retry ceiling and was removed.
    Dropped,
    /// No longer queued.
    Gone,
}

/// The persisted operation queue.
pub struct DurableQueue {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    write_lock: Mutex<()>,
    stats_tx: watch::Sender<QueueStats>,
}

impl DurableQueue {
    /// Creates a queue stored under `{key_prefix}/queue`.
    pub fn new(kv: Arc<dyn KeyValueStore>, key_prefix: &str) -> Self {
        let (stats_tx, _) = watch::channel(QueueStats::default());
        Self {
            kv,
            key: KeySpace::new(key_prefix).queue(),
            write_lock: Mutex::new(()),
            stats_tx,
        }
    }

    /// Returns every operation in enqueue order.
    ///
    /// Read failures degrade to an empty queue.
    pub async fn operations(&self) -> Vec<Operation> {
        match self.read_ops().await {
            Ok(ops) => ops,
            Err(e) => {
                warn!("Failed to read queue, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Operations writing to `collection` in `owner`'s namespace, in enqueue order.
    pub async fn operations_for(&self, collection: &str, owner: Option<&OwnerId>) -> Vec<Operation> {
        self.operations()
            .await
            .into_iter()
            .filter(|op| op.collection == collection && op.belongs_to(owner))
            .collect()
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats::from_operations(&self.operations().await)
    }

    /// Number of operations not yet acknowledged by the remote store.
    pub async fn pending_count(&self) -> usize {
        self.stats().await.total
    }

    /// Subscribes to queue statistics, pushed after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<QueueStats> {
        self.stats_tx.subscribe()
    }

    /// Appends an operation.
    pub async fn append(&self, op: Operation) -> SyncResult<()> {
        debug!("Queueing {} {}/{} ({})", op.kind, op.collection, op.document_id, op.id);
        self.modify(|ops| ops.push(op)).await
    }

    /// Applies `f` to the operation with the given id. Returns false if it is
    /// no longer queued.
    pub async fn update(&self, id: OperationId, f: impl FnOnce(&mut Operation)) -> SyncResult<bool> {
        self.modify(|ops| match ops.iter_mut().find(|op| op.id == id) {
            Some(op) => {
                f(op);
                true
            }
            None => false,
        })
        .await
    }

    /// Removes an operation. Returns false if it was not queued.
    pub async fn remove(&self, id: OperationId) -> SyncResult<bool> {
        self.modify(|ops| {
            let before = ops.len();
            ops.retain(|op| op.id != id);
            ops.len() != before
        })
        .await
    }

    /// Records a failed remote attempt. Once the retry count reaches
    /// `max_retries` the operation is removed for good.
    pub async fn record_failure(
        &self,
        id: OperationId,
        error: &str,
        max_retries: u32,
    ) -> SyncResult<FailureOutcome> {
        self.modify(|ops| {
            let Some(pos) = ops.iter().position(|op| op.id == id) else {
                return FailureOutcome::Gone;
            };
            let retry_count = ops[pos].mark_failed(error);
            if retry_count >= max_retries {
                ops.remove(pos);
                FailureOutcome::Dropped
            } else {
                FailureOutcome::Retry { retry_count }
            }
        })
        .await
    }

    /// Resets every FAILED operation to PENDING with a fresh retry budget.
    /// Returns how many were reset.
    pub async fn reset_failed(&self) -> SyncResult<usize> {
        self.modify(|ops| {
            let mut reset = 0;
            for op in ops.iter_mut().filter(|op| op.status == OperationStatus::Failed) {
                op.reset();
                reset += 1;
            }
            reset
        })
        .await
    }

    /// Returns operations left PROCESSING by an interrupted drain to PENDING.
    /// Their retry counts are kept.
    pub async fn recover_interrupted(&self) -> SyncResult<usize> {
        self.modify(|ops| {
            let mut recovered = 0;
            for op in ops.iter_mut().filter(|op| op.status == OperationStatus::Processing) {
                op.status = OperationStatus::Pending;
                recovered += 1;
            }
            recovered
        })
        .await
    }

    /// Drops every queued operation.
    pub async fn clear(&self) -> SyncResult<()> {
        self.modify(Vec::clear).await
    }

    /// Re-publishes the current statistics.
    pub async fn publish_current(&self) {
        let stats = self.stats().await;
        self.stats_tx.send_replace(stats);
    }

    /// Read-modify-write under the write lock.
    async fn modify<R>(&self, f: impl FnOnce(&mut Vec<Operation>) -> R) -> SyncResult<R> {
        let _guard = self.write_lock.lock().await;
        let mut ops = self.read_ops().await?;
        let result = f(&mut ops);
        self.kv.set(&self.key, encode(&ops)?).await?;
        self.publish(&ops);
        Ok(result)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn publish(&self, ops: &[Operation]) {
        self.stats_tx.send_replace(QueueStats::from_operations(ops));
    }

    /// Reads the persisted queue. The stored array is in append order, which
    /// is the only order the queue trusts; `enqueued_at` is informational and
    /// follows the wall clock.
    ///
    /// An unreadable blob is discarded; a failing backend is reported, so a
    /// write does not overwrite a queue it could not see.
    pub(crate) async fn read_ops(&self) -> SyncResult<Vec<Operation>> {
        let Some(raw) = self.kv.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Operation>>(&raw) {
            Ok(ops) => Ok(ops),
            Err(e) => {
                error!("Discarding unreadable queue: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

pub(crate) fn encode(ops: &[Operation]) -> SyncResult<String> {
    serde_json::to_string(ops).map_err(SyncError::from)
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue").field("key", &self.key).finish()
    }
}
