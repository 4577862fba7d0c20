//! Local mirror of remote collections, one blob per `(owner, collection)`.
//!
//! Every document written through the cache is normalized first (timestamps
//! rendered in canonical string form, see [`CollectionSchema::canonicalize`]),
//! so a re-read looks the same whether a value came from the device or the
//! remote store.
//!
//! Reads never fail: unreadable blobs degrade to "absent", and a collection
//! holding any document owned by a different identity is discarded whole.

use crate::error::SyncResult;
use crate::keys::KeySpace;
use chrono::{DateTime, Utc};
use harbor_storage::KeyValueStore;
use harbor_types::{CollectionSchema, Document, DocumentId, Fields, OwnerId, SchemaRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// A cached collection as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCollection {
    pub owner_id: Option<OwnerId>,
    pub collection: String,
    pub items: Vec<Document>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    /// Set when the items were last reconciled with a remote snapshot.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CachedCollection {
    pub fn new(owner_id: Option<OwnerId>, collection: impl Into<String>) -> Self {
        Self {
            owner_id,
            collection: collection.into(),
            items: Vec::new(),
            cached_at: Utc::now(),
            last_synced_at: None,
        }
    }

    pub fn find(&self, id: &DocumentId) -> Option<&Document> {
        self.items.iter().find(|doc| &doc.id == id)
    }
}

/// The local cache store.
pub struct LocalCache {
    kv: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    schemas: Arc<SchemaRegistry>,
    owner_fields: Vec<String>,
    write_lock: Mutex<()>,
}

impl LocalCache {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        key_prefix: &str,
        schemas: Arc<SchemaRegistry>,
        owner_fields: Vec<String>,
    ) -> Self {
        Self {
            kv,
            keys: KeySpace::new(key_prefix),
            schemas,
            owner_fields,
            write_lock: Mutex::new(()),
        }
    }

    /// Loads a cached collection, or `None` if absent or unusable.
    pub async fn load(&self, collection: &str, owner: Option<&OwnerId>) -> Option<CachedCollection> {
        let key = self.keys.cache(owner, collection);
        let cached = match self.read(&key).await {
            Ok(cached) => cached?,
            Err(e) => {
                warn!("Failed to read cache {}: {}", key, e);
                return None;
            }
        };

        if self.leaks_other_owner(&cached, owner) {
            warn!("Cache {} holds documents of another owner, discarding it", key);
            if let Err(e) = self.kv.remove(&key).await {
                warn!("Failed to remove stale cache {}: {}", key, e);
            }
            return None;
        }
        Some(cached)
    }

    /// Documents visible to the UI for `(collection, owner)`.
    pub async fn get(&self, collection: &str, owner: Option<&OwnerId>) -> Vec<Document> {
        self.load(collection, owner)
            .await
            .map(|cached| cached.items)
            .unwrap_or_default()
    }

    pub async fn get_one(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        id: &DocumentId,
    ) -> Option<Document> {
        self.load(collection, owner)
            .await
            .and_then(|cached| cached.find(id).cloned())
    }

    /// Replaces every item of the collection.
    pub async fn save(&self, collection: &str, owner: Option<&OwnerId>, items: Vec<Document>) -> SyncResult<()> {
        self.transform(collection, owner, false, |_| (items, ())).await
    }

    /// Inserts a document, or replaces the one with the same id.
    pub async fn upsert_one(&self, collection: &str, owner: Option<&OwnerId>, doc: Document) -> SyncResult<()> {
        self.transform(collection, owner, false, |mut items| {
            match items.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc,
                None => items.push(doc),
            }
            (items, ())
        })
        .await
    }

    /// Merges fields into an existing document. Returns false if absent.
    pub async fn update_one(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        id: &DocumentId,
        patch: &Fields,
    ) -> SyncResult<bool> {
        self.transform(collection, owner, false, |mut items| {
            let found = match items.iter_mut().find(|d| &d.id == id) {
                Some(existing) => {
                    existing.merge(patch);
                    true
                }
                None => false,
            };
            (items, found)
        })
        .await
    }

    /// Merges fields into a document, creating it if absent.
    pub async fn merge_one(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        id: &DocumentId,
        patch: &Fields,
    ) -> SyncResult<()> {
        self.transform(collection, owner, false, |mut items| {
            match items.iter_mut().find(|d| &d.id == id) {
                Some(existing) => existing.merge(patch),
                None => items.push(Document::from_fields(id.clone(), patch.clone())),
            }
            (items, ())
        })
        .await
    }

    /// Removes a document. Returns false if it was not cached.
    pub async fn remove_one(&self, collection: &str, owner: Option<&OwnerId>, id: &DocumentId) -> SyncResult<bool> {
        self.transform(collection, owner, false, |mut items| {
            let before = items.len();
            items.retain(|d| &d.id != id);
            let removed = items.len() != before;
            (items, removed)
        })
        .await
    }

    /// Drops the cached collection.
    pub async fn clear(&self, collection: &str, owner: Option<&OwnerId>) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        self.kv.remove(&self.keys.cache(owner, collection)).await?;
        Ok(())
    }

    /// Read-modify-write of one collection under the write lock.
    ///
    /// `f` receives the current items (empty if absent or unusable) and
    /// returns the new items plus a result. `synced` stamps `last_synced_at`.
    pub async fn transform<R>(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        synced: bool,
        f: impl FnOnce(Vec<Document>) -> (Vec<Document>, R),
    ) -> SyncResult<R> {
        let _guard = self.write_lock.lock().await;
        self.transform_locked(collection, owner, synced, f).await
    }

    /// [`transform`](Self::transform) for a caller already holding the
    /// guard returned by [`lock`](Self::lock).
    pub(crate) async fn transform_locked<R>(
        &self,
        collection: &str,
        owner: Option<&OwnerId>,
        synced: bool,
        f: impl FnOnce(Vec<Document>) -> (Vec<Document>, R),
    ) -> SyncResult<R> {
        let key = self.keys.cache(owner, collection);

        let mut cached = match self.read(&key).await? {
            Some(cached) if !self.leaks_other_owner(&cached, owner) => cached,
            _ => CachedCollection::new(owner.cloned(), collection),
        };

        let (items, result) = f(std::mem::take(&mut cached.items));
        cached.items = normalize_items(items, self.schemas.schema_for(collection));
        cached.cached_at = Utc::now();
        if synced {
            cached.last_synced_at = Some(cached.cached_at);
        }

        debug!("Caching {} items under {}", cached.items.len(), key);
        self.kv.set(&key, serde_json::to_string(&cached)?).await?;
        Ok(result)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub(crate) fn owner_fields(&self) -> &[String] {
        &self.owner_fields
    }

    pub(crate) fn schema_for(&self, collection: &str) -> &CollectionSchema {
        self.schemas.schema_for(collection)
    }

    pub(crate) fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Reads a blob. Unparseable blobs count as absent.
    pub(crate) async fn read(&self, key: &str) -> SyncResult<Option<CachedCollection>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(cached) => Ok(Some(cached)),
            Err(e) => {
                warn!("Discarding unreadable cache {}: {}", key, e);
                Ok(None)
            }
        }
    }

    pub(crate) fn leaks_other_owner(&self, cached: &CachedCollection, owner: Option<&OwnerId>) -> bool {
        cached.owner_id.as_ref() != owner
            || cached
                .items
                .iter()
                .any(|doc| doc.owner_conflicts(&self.owner_fields, owner))
    }
}

/// Canonicalizes documents, drops id-less ones and de-duplicates by id.
/// A repeated id keeps its first position and its last content.
pub(crate) fn normalize_items(items: Vec<Document>, schema: &CollectionSchema) -> Vec<Document> {
    let mut out: Vec<Document> = Vec::with_capacity(items.len());
    let mut index: HashMap<DocumentId, usize> = HashMap::new();

    for mut doc in items {
        if doc.id.is_empty() {
            warn!("Dropping cached document without id");
            continue;
        }
        schema.canonicalize(&mut doc.fields);
        match index.get(&doc.id) {
            Some(&i) => out[i] = doc,
            None => {
                index.insert(doc.id.clone(), out.len());
                out.push(doc);
            }
        }
    }
    out
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("keys", &self.keys)
            .field("owner_fields", &self.owner_fields)
            .finish()
    }
}
