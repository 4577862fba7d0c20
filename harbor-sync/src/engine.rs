//! The sync engine: one instance per process, shared by cloning.
//!
//! Writes go through [`SyncEngine::enqueue`], which persists the intent,
//! applies it optimistically to the local cache and schedules a debounced
//! drain. Remote snapshots go through [`SyncEngine::merge_snapshot`] before
//! readers see them. Reads are served from the local cache only and never
//! wait on the remote store.

use crate::cache::{CachedCollection, LocalCache};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::migrator::{MigrationReport, NamespaceMigrator};
use crate::processor::{DrainReport, QueueProcessor};
use crate::queue::DurableQueue;
use crate::reconciler::Reconciler;
use crate::remote::RemoteStore;
use harbor_storage::KeyValueStore;
use harbor_types::{
    Document, DocumentId, Fields, Operation, OperationId, OperationKind, OwnerId, QueueStats,
    SchemaRegistry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct EngineInner {
    config: SyncConfig,
    schemas: Arc<SchemaRegistry>,
    queue: Arc<DurableQueue>,
    cache: Arc<LocalCache>,
    processor: Arc<QueueProcessor>,
    migrator: NamespaceMigrator,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    drain_scheduled: AtomicBool,
}

/// The offline synchronization engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates an engine over a durable store, a remote store and a
    /// connectivity monitor.
    pub fn new(
        config: SyncConfig,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let schemas = Arc::new(config.schema_registry());
        let queue = Arc::new(DurableQueue::new(Arc::clone(&kv), &config.key_prefix));
        let cache = Arc::new(LocalCache::new(
            kv,
            &config.key_prefix,
            Arc::clone(&schemas),
            config.owner_fields.clone(),
        ));
        let processor = Arc::new(QueueProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
            &config,
        ));
        let migrator = NamespaceMigrator::new(Arc::clone(&queue), Arc::clone(&cache), processor.drain_lock());

        Self {
            inner: Arc::new(EngineInner {
                config,
                schemas,
                queue,
                cache,
                processor,
                migrator,
                remote,
                connectivity,
                drain_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Recovers operations interrupted by a previous shutdown and starts
    /// draining on every Offline→Online edge.
    ///
    /// The returned task ends once the engine is dropped and the next edge
    /// arrives, or when the connectivity monitor goes away.
    pub async fn start(&self) -> JoinHandle<()> {
        match self.inner.queue.recover_interrupted().await {
            Ok(0) => {}
            Ok(n) => info!("Recovered {} operations interrupted mid-drain", n),
            Err(e) => warn!("Failed to recover interrupted operations: {}", e),
        }
        self.inner.queue.publish_current().await;
        if self.inner.queue.pending_count().await > 0 {
            self.schedule_drain();
        }

        let mut edges = self.inner.connectivity.subscribe_online();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match edges.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        info!("Back online, draining queue");
                        inner.processor.process_queue().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Connectivity listener stopped");
        })
    }

    // ── Session ──────────────────────────────────────────────────

    /// Sets the identity whose queued writes may be sent to the remote store.
    pub async fn set_session(&self, owner: Option<OwnerId>) {
        self.inner.processor.set_session(owner).await;
        self.schedule_drain();
    }

    pub async fn session(&self) -> Option<OwnerId> {
        self.inner.processor.session().await
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Queues a write intent and applies it to the local cache right away.
    ///
    /// Never fails from the caller's point of view: local storage failures
    /// are logged and remote delivery happens later. A write that could not
    /// be queued is not shown in the cache either.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        collection: &str,
        document_id: impl Into<DocumentId>,
        owner: Option<OwnerId>,
        payload: Fields,
    ) -> OperationId {
        let op = Operation::new(kind, collection, document_id, owner, payload);
        let id = op.id;

        // Queued before the cache sees it, so a concurrent snapshot merge
        // either finds the operation or runs before the optimistic write.
        if let Err(e) = self.inner.queue.append(op.clone()).await {
            error!("Failed to persist queued operation {}: {}", id, e);
            return id;
        }
        self.apply_optimistic(&op).await;
        self.schedule_drain();
        id
    }

    /// Queues the creation of a document.
    pub async fn create(&self, collection: &str, doc: Document, owner: Option<OwnerId>) -> OperationId {
        self.enqueue(OperationKind::Create, collection, doc.id, owner, doc.fields)
            .await
    }

    /// Queues a partial update of a document.
    pub async fn update(
        &self,
        collection: &str,
        id: impl Into<DocumentId>,
        owner: Option<OwnerId>,
        patch: Fields,
    ) -> OperationId {
        self.enqueue(OperationKind::Update, collection, id, owner, patch)
            .await
    }

    /// Queues the deletion of a document.
    pub async fn delete(&self, collection: &str, id: impl Into<DocumentId>, owner: Option<OwnerId>) -> OperationId {
        self.enqueue(OperationKind::Delete, collection, id, owner, Fields::new())
            .await
    }

    async fn apply_optimistic(&self, op: &Operation) {
        let cache = &self.inner.cache;
        let owner = op.owner_id.as_ref();
        let applied = match op.kind {
            OperationKind::Create | OperationKind::Update => {
                cache
                    .merge_one(&op.collection, owner, &op.document_id, &op.payload)
                    .await
            }
            OperationKind::Delete => cache
                .remove_one(&op.collection, owner, &op.document_id)
                .await
                .map(|_| ()),
        };
        if let Err(e) = applied {
            warn!("Failed to apply {} {}/{} to the cache: {}", op.kind, op.collection, op.document_id, e);
        }
    }

    /// Schedules a debounced drain if online. Bursts of calls collapse into
    /// one drain; a drain already running is waited out and followed by
    /// another, so late writes are not left behind.
    fn schedule_drain(&self) {
        let inner = &self.inner;
        if !inner.connectivity.is_online() || inner.drain_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(inner.config.drain_debounce()).await;
                inner.drain_scheduled.store(false, Ordering::SeqCst);
                if inner.processor.try_drain().await.is_some() {
                    break;
                }
                if inner.drain_scheduled.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Documents currently visible for `(collection, owner)`.
    pub async fn get_from_cache(&self, collection: &str, owner: Option<&OwnerId>) -> Vec<Document> {
        self.inner.cache.get(collection, owner).await
    }

    pub async fn get_document(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        id: &DocumentId,
    ) -> Option<Document> {
        self.inner.cache.get_one(collection, owner, id).await
    }

    /// The cached collection with its `cachedAt`/`lastSyncedAt` stamps.
    pub async fn cached_collection(&self, collection: &str, owner: Option<&OwnerId>) -> Option<CachedCollection> {
        self.inner.cache.load(collection, owner).await
    }

    pub async fn clear_cache(&self, collection: &str, owner: Option<&OwnerId>) -> SyncResult<()> {
        self.inner.cache.clear(collection, owner).await
    }

    // ── Queue ────────────────────────────────────────────────────

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.pending_count().await
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.queue.stats().await
    }

    /// Every queued operation, in enqueue order.
    pub async fn operations(&self) -> Vec<Operation> {
        self.inner.queue.operations().await
    }

    /// Subscribes to queue statistics, pushed after every queue mutation.
    pub fn subscribe_queue(&self) -> watch::Receiver<QueueStats> {
        self.inner.queue.subscribe()
    }

    /// Gives every FAILED operation a fresh retry budget and schedules a drain.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let reset = self.inner.queue.reset_failed().await?;
        if reset > 0 {
            info!("Retrying {} failed operations", reset);
            self.schedule_drain();
        }
        Ok(reset)
    }

    /// Drains the queue now. Returns an empty report if a drain is running.
    pub async fn process_queue(&self) -> DrainReport {
        self.inner.processor.process_queue().await
    }

    /// Drops every queued operation without sending it.
    pub async fn clear_queue(&self) -> SyncResult<()> {
        self.inner.queue.clear().await
    }

    // ── Snapshots ────────────────────────────────────────────────

    /// Reconciles a full remote snapshot of a collection into the cache.
    pub async fn merge_snapshot(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        remote: Vec<Document>,
    ) -> SyncResult<()> {
        let cache = &self.inner.cache;
        // Optimistic writes wait here, so no enqueue lands between reading
        // the queue and writing the merged items.
        let _guard = cache.lock().await;
        let queued = self.inner.queue.operations_for(collection, owner).await;
        let reconciler = Reconciler::new(
            self.inner.schemas.schema_for(collection),
            &self.inner.config.temp_id_prefixes,
        );
        debug!("Merging {} remote items into {}", remote.len(), collection);
        cache
            .transform_locked(collection, owner, true, |cached| {
                (reconciler.merge(&cached, remote, &queued), ())
            })
            .await
    }

    /// Lists a remote collection and reconciles it into the cache.
    ///
    /// Bounded by the read timeout. On failure the cache is left as it was.
    pub async fn pull(&self, collection: &str, owner: &OwnerId) -> SyncResult<Vec<Document>> {
        let remote = tokio::time::timeout(
            self.inner.config.read_timeout(),
            self.inner.remote.list(owner, collection),
        )
        .await??;
        self.merge_snapshot(collection, Some(owner), remote).await?;
        Ok(self.get_from_cache(collection, Some(owner)).await)
    }

    /// Merges every snapshot delivered on `snapshots` until the sender closes.
    pub fn watch_snapshots(
        &self,
        collection: impl Into<String>,
        owner: Option<OwnerId>,
        mut snapshots: mpsc::Receiver<Vec<Document>>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        let collection = collection.into();
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.recv().await {
                if let Err(e) = engine.merge_snapshot(&collection, owner.as_ref(), snapshot).await {
                    warn!("Failed to merge snapshot of {}: {}", collection, e);
                }
            }
            debug!("Snapshot stream for {} closed", collection);
        })
    }

    // ── Identity ─────────────────────────────────────────────────

    /// Moves every cached collection and queued operation from `from` to
    /// `to`. A session on `from` follows to `to`.
    pub async fn migrate(&self, from: &OwnerId, to: &OwnerId) -> SyncResult<MigrationReport> {
        self.migrate_namespace(Some(from), to).await
    }

    /// Moves the anonymous namespace to a permanent identity.
    pub async fn adopt_anonymous(&self, to: &OwnerId) -> SyncResult<MigrationReport> {
        self.migrate_namespace(None, to).await
    }

    async fn migrate_namespace(&self, from: Option<&OwnerId>, to: &OwnerId) -> SyncResult<MigrationReport> {
        let report = self.inner.migrator.migrate(from, to).await.map_err(|e| match e {
            SyncError::Migration(_) => e,
            other => SyncError::Migration(other.to_string()),
        })?;
        if self.inner.processor.replace_session(from, to).await {
            info!("Session moved to {}", to);
        }
        self.schedule_drain();
        Ok(report)
    }

    // ── Connectivity ─────────────────────────────────────────────

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.inner.connectivity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("online", &self.is_online())
            .field("processor", &self.inner.processor)
            .finish_non_exhaustive()
    }
}
