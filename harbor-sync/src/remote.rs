//! Remote document store abstraction.
//!
//! The remote store holds hierarchical collections addressed by
//! `(owner, collection, document id)`. The engine assumes eventual, not
//! immediate, consistency from it.

use crate::error::SyncResult;
use async_trait::async_trait;
use harbor_types::{Document, DocumentId, Fields, OwnerId};

/// A remote document store the queue processor drains into.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads a document. Returns `None` if it does not exist.
    async fn get(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
    ) -> SyncResult<Option<Fields>>;

    /// Writes the full document, creating or replacing it.
    async fn set(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
        fields: Fields,
    ) -> SyncResult<()>;

    /// Merges top-level fields into an existing document.
    /// Fails with `SyncError::NotFound` if the document does not exist.
    async fn merge(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
        fields: Fields,
    ) -> SyncResult<()>;

    /// Deletes a document. Returns false if it was already absent.
    async fn delete(&self, owner: &OwnerId, collection: &str, id: &DocumentId)
        -> SyncResult<bool>;

    /// Lists every document in a collection.
    async fn list(&self, owner: &OwnerId, collection: &str) -> SyncResult<Vec<Document>>;
}

/// An in-memory remote store for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// A call received by the mock store.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RemoteCall {
        Get { collection: String, id: String },
        Set { collection: String, id: String },
        Merge { collection: String, id: String },
        Delete { collection: String, id: String },
        List { collection: String },
    }

    impl RemoteCall {
        /// Returns true for calls that write.
        pub fn is_write(&self) -> bool {
            matches!(
                self,
                RemoteCall::Set { .. } | RemoteCall::Merge { .. } | RemoteCall::Delete { .. }
            )
        }
    }

    type CollectionKey = (OwnerId, String);

    /// Remote store held in memory, with failure and latency injection.
    #[derive(Debug, Default)]
    pub struct MemoryRemoteStore {
        collections: Mutex<HashMap<CollectionKey, BTreeMap<DocumentId, Fields>>>,
        calls: Mutex<Vec<RemoteCall>>,
        failing: AtomicBool,
        fail_next: AtomicU32,
        latency: Mutex<Option<Duration>>,
    }

    impl MemoryRemoteStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every call fail until turned off.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Makes the next `n` calls fail.
        pub fn fail_next(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Delays every call by `latency`.
        pub async fn set_latency(&self, latency: Option<Duration>) {
            *self.latency.lock().await = latency;
        }

        /// Seeds a document directly, bypassing the call log.
        pub async fn insert(&self, owner: &OwnerId, collection: &str, doc: Document) {
            self.collections
                .lock()
                .await
                .entry((owner.clone(), collection.to_string()))
                .or_default()
                .insert(doc.id, doc.fields);
        }

        /// Reads a document directly, bypassing the call log.
        pub async fn document(
            &self,
            owner: &OwnerId,
            collection: &str,
            id: &DocumentId,
        ) -> Option<Fields> {
            self.collections
                .lock()
                .await
                .get(&(owner.clone(), collection.to_string()))
                .and_then(|docs| docs.get(id).cloned())
        }

        /// Number of documents stored for an owner's collection.
        pub async fn len(&self, owner: &OwnerId, collection: &str) -> usize {
            self.collections
                .lock()
                .await
                .get(&(owner.clone(), collection.to_string()))
                .map_or(0, BTreeMap::len)
        }

        /// Every call received so far, in order.
        pub async fn calls(&self) -> Vec<RemoteCall> {
            self.calls.lock().await.clone()
        }

        /// Only the writing calls, in order.
        pub async fn writes(&self) -> Vec<RemoteCall> {
            self.calls
                .lock()
                .await
                .iter()
                .filter(|c| c.is_write())
                .cloned()
                .collect()
        }

        async fn record(&self, call: RemoteCall) -> SyncResult<()> {
            self.calls.lock().await.push(call);
            let latency = *self.latency.lock().await;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Network("remote unavailable".into()));
            }
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(SyncError::Network("injected failure".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryRemoteStore {
        async fn get(
            &self,
            owner: &OwnerId,
            collection: &str,
            id: &DocumentId,
        ) -> SyncResult<Option<Fields>> {
            self.record(RemoteCall::Get {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;
            Ok(self.document(owner, collection, id).await)
        }

        async fn set(
            &self,
            owner: &OwnerId,
            collection: &str,
            id: &DocumentId,
            fields: Fields,
        ) -> SyncResult<()> {
            self.record(RemoteCall::Set {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;
            self.collections
                .lock()
                .await
                .entry((owner.clone(), collection.to_string()))
                .or_default()
                .insert(id.clone(), fields);
            Ok(())
        }

        async fn merge(
            &self,
            owner: &OwnerId,
            collection: &str,
            id: &DocumentId,
            fields: Fields,
        ) -> SyncResult<()> {
            self.record(RemoteCall::Merge {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;
            let mut collections = self.collections.lock().await;
            let existing = collections
                .get_mut(&(owner.clone(), collection.to_string()))
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            existing.extend(fields);
            Ok(())
        }

        async fn delete(
            &self,
            owner: &OwnerId,
            collection: &str,
            id: &DocumentId,
        ) -> SyncResult<bool> {
            self.record(RemoteCall::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;
            Ok(self
                .collections
                .lock()
                .await
                .get_mut(&(owner.clone(), collection.to_string()))
                .and_then(|docs| docs.remove(id))
                .is_some())
        }

        async fn list(&self, owner: &OwnerId, collection: &str) -> SyncResult<Vec<Document>> {
            self.record(RemoteCall::List {
                collection: collection.to_string(),
            })
            .await?;
            Ok(self
                .collections
                .lock()
                .await
                .get(&(owner.clone(), collection.to_string()))
                .map(|docs| {
                    docs.iter()
                        .map(|(id, fields)| Document::from_fields(id.clone(), fields.clone()))
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}
