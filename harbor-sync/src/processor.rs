//! Draining the durable queue against the remote store.
//!
//! A drain is single-flight: a call made while another drain runs returns
//! at once with an empty report. Within a drain, operations are sent one at
//! a time in enqueue order, so an UPDATE never overtakes the CREATE it
//! depends on.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::queue::{DurableQueue, FailureOutcome};
use crate::remote::RemoteStore;
use crate::sanitize::sanitize_payload;
use harbor_types::{Operation, OperationKind, OperationStatus, OwnerId, SchemaRegistry};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome counts of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Acknowledged by the remote store and removed from the queue.
    pub success: usize,
    /// Failed this time (including the ones dropped).
    pub failed: usize,
    /// Failed for the last allowed time and removed from the queue.
    pub dropped: usize,
    /// Left untouched because they belong to another identity.
    pub skipped: usize,
}

impl DrainReport {
    /// Number of operations a remote call was attempted for.
    pub fn attempted(&self) -> usize {
        self.success + self.failed
    }
}

/// The queue processor.
pub struct QueueProcessor {
    queue: Arc<DurableQueue>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    schemas: Arc<SchemaRegistry>,
    session: RwLock<Option<OwnerId>>,
    drain_lock: Arc<Mutex<()>>,
    max_retries: u32,
    request_timeout: Duration,
    read_timeout: Duration,
    local_field_prefix: String,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<DurableQueue>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            connectivity,
            schemas: Arc::new(config.schema_registry()),
            session: RwLock::new(None),
            drain_lock: Arc::new(Mutex::new(())),
            max_retries: config.max_retries,
            request_timeout: config.request_timeout(),
            read_timeout: config.read_timeout(),
            local_field_prefix: config.local_field_prefix.clone(),
        }
    }

    /// Sets the identity whose operations may be transmitted.
    pub async fn set_session(&self, owner: Option<OwnerId>) {
        *self.session.write().await = owner;
    }

    pub async fn session(&self) -> Option<OwnerId> {
        self.session.read().await.clone()
    }

    /// Moves the session to `to` if it is currently `from`.
    pub(crate) async fn replace_session(&self, from: Option<&OwnerId>, to: &OwnerId) -> bool {
        let mut session = self.session.write().await;
        if session.as_ref() != from {
            return false;
        }
        *session = Some(to.clone());
        true
    }

    /// Returns true while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    /// Drains the queue, or returns an empty report if a drain is already
    /// running.
    pub async fn process_queue(&self) -> DrainReport {
        match self.try_drain().await {
            Some(report) => report,
            None => {
                debug!("Drain already in progress");
                DrainReport::default()
            }
        }
    }

    /// Drains the queue. Returns `None` if a drain is already running.
    pub async fn try_drain(&self) -> Option<DrainReport> {
        let _guard = self.drain_lock.try_lock().ok()?;
        Some(self.drain().await)
    }

    pub(crate) fn drain_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.drain_lock)
    }

    async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.connectivity.refresh().await {
            debug!("Offline, not draining");
            return report;
        }

        let snapshot: Vec<Operation> = self
            .queue
            .operations()
            .await
            .into_iter()
            .filter(|op| matches!(op.status, OperationStatus::Pending | OperationStatus::Failed))
            .collect();
        if snapshot.is_empty() {
            return report;
        }

        let session = self.session().await;
        info!("Draining {} queued operations", snapshot.len());

        for op in snapshot {
            let owner = match (&op.owner_id, &session) {
                (Some(owner), Some(current)) if owner == current => owner.clone(),
                _ => {
                    debug!("Skipping {} of another identity", op.id);
                    report.skipped += 1;
                    continue;
                }
            };

            match self.queue.update(op.id, Operation::mark_processing).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("Failed to mark {} as processing: {}", op.id, e);
                    report.failed += 1;
                    continue;
                }
            }

            match self.send(&op, &owner).await {
                Ok(()) => {
                    report.success += 1;
                    if let Err(e) = self.queue.remove(op.id).await {
                        warn!("Failed to remove acknowledged {}: {}", op.id, e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    match self.queue.record_failure(op.id, &message, self.max_retries).await {
                        Ok(FailureOutcome::Retry { retry_count }) => warn!(
                            "{} {}/{} failed (attempt {}/{}): {}",
                            op.kind, op.collection, op.document_id, retry_count, self.max_retries, message
                        ),
                        Ok(FailureOutcome::Dropped) => {
                            report.dropped += 1;
                            warn!(
                                "Dropping {} {}/{} after {} attempts: {}",
                                op.kind, op.collection, op.document_id, self.max_retries, message
                            );
                        }
                        Ok(FailureOutcome::Gone) => {}
                        Err(e) => warn!("Failed to record failure of {}: {}", op.id, e),
                    }
                }
            }
        }

        info!(
            "Drain finished: {} succeeded, {} failed, {} dropped, {} skipped",
            report.success, report.failed, report.dropped, report.skipped
        );
        report
    }

    /// Applies one operation to the remote store.
    async fn send(&self, op: &Operation, owner: &OwnerId) -> SyncResult<()> {
        let schema = self.schemas.schema_for(&op.collection);
        let payload = sanitize_payload(&op.payload, schema, &self.local_field_prefix);
        let (collection, id) = (op.collection.as_str(), &op.document_id);

        match op.kind {
            OperationKind::Create => {
                bounded(self.request_timeout, self.remote.set(owner, collection, id, payload)).await
            }
            OperationKind::Update => {
                let exists = bounded(self.read_timeout, self.remote.get(owner, collection, id))
                    .await?
                    .is_some();
                if !exists {
                    debug!("{}/{} missing on the remote, writing in full", collection, id);
                    return bounded(self.request_timeout, self.remote.set(owner, collection, id, payload)).await;
                }
                let merged =
                    bounded(self.request_timeout, self.remote.merge(owner, collection, id, payload.clone())).await;
                match merged {
                    Err(SyncError::NotFound(_)) => {
                        bounded(self.request_timeout, self.remote.set(owner, collection, id, payload)).await
                    }
                    other => other,
                }
            }
            OperationKind::Delete => {
                let existed = bounded(self.request_timeout, self.remote.delete(owner, collection, id)).await?;
                if !existed {
                    debug!("{}/{} already absent on the remote", collection, id);
                }
                Ok(())
            }
        }
    }
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
    tokio::time::timeout(limit, fut).await?
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("max_retries", &self.max_retries)
            .field("draining", &self.is_draining())
            .finish()
    }
}
