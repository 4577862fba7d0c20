//! Queued write intents.
//!
//! An [`Operation`] is created on enqueue, moves `PENDING -> PROCESSING`
//! while a drain transmits it, and is then either removed (success) or
//! marked `FAILED` with the captured error until the retry ceiling drops it.
//!
//! The serialized shape is the one persisted in the durable queue and shown
//! to consumers:
//! `{id, type, collection, documentId, userId, payload, timestamp, retryCount, status, error?}`.

use crate::{DocumentId, Fields, OperationId, OwnerId};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of write intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Processing status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Failed,
}

/// A queued create/update/delete awaiting remote application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub collection: String,
    pub document_id: DocumentId,
    /// `None` while an anonymous session buffers writes.
    #[serde(rename = "userId", default)]
    pub owner_id: Option<OwnerId>,
    #[serde(default)]
    pub payload: Fields,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    pub status: OperationStatus,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Operation {
    /// Creates a new pending operation stamped with the current time, at the
    /// millisecond precision it is persisted with.
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        document_id: impl Into<DocumentId>,
        owner_id: Option<OwnerId>,
        payload: Fields,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            collection: collection.into(),
            document_id: document_id.into(),
            owner_id,
            payload,
            enqueued_at: Utc::now().trunc_subsecs(3),
            retry_count: 0,
            status: OperationStatus::Pending,
            last_error: None,
        }
    }

    /// Returns true if this operation writes `document_id` in `collection`.
    #[must_use]
    pub fn targets(&self, collection: &str, document_id: &DocumentId) -> bool {
        self.collection == collection && &self.document_id == document_id
    }

    /// Returns true if this operation belongs to the given owner namespace.
    #[must_use]
    pub fn belongs_to(&self, owner: Option<&OwnerId>) -> bool {
        self.owner_id.as_ref() == owner
    }

    pub fn mark_processing(&mut self) {
        self.status = OperationStatus::Processing;
    }

    /// Records a failed attempt and returns the new retry count.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.status = OperationStatus::Failed;
        self.last_error = Some(error.into());
        self.retry_count
    }

    /// Puts a failed operation back in line with a fresh retry budget.
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.status = OperationStatus::Pending;
        self.last_error = None;
    }
}

/// Aggregate counts over the queue, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStats {
    /// Computes statistics over a set of operations.
    pub fn from_operations<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> Self {
        let mut stats = Self::default();
        for op in ops {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        stats
    }
}
