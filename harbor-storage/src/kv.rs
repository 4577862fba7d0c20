//! The key-value store abstraction.

use crate::error::StorageResult;
use async_trait::async_trait;

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Set { key: String, value: String },
    Remove { key: String },
}

impl KvWrite {
    /// The key this write touches.
    pub fn key(&self) -> &str {
        match self {
            KvWrite::Set { key, .. } | KvWrite::Remove { key } => key,
        }
    }
}

/// An ordered group of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<KvWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.writes.push(KvWrite::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.writes.push(KvWrite::Remove { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[KvWrite] {
        &self.writes
    }
}

impl IntoIterator for WriteBatch {
    type Item = KvWrite;
    type IntoIter = std::vec::IntoIter<KvWrite>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

/// A flat, persisted string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value. Returns `None` if the key is absent.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;

    /// Removes a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Applies every write in the batch, or none of them.
    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()>;
}
