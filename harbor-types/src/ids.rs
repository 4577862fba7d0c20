//! Identifier types used throughout the harbor engine.
//!
//! Operation ids use UUID v7, which embeds a millisecond timestamp followed by
//! random bits, so ids generated later sort later.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix used for document ids minted on the device before the remote
/// store has seen them.
pub const TEMPORARY_ID_PREFIX: &str = "local_";

/// Id of a queued operation, minted once on enqueue.
///
/// Only used to address an operation inside the queue; queue position,
/// not id order, decides which write came last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        s.parse()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identity that owns a namespace of cached collections and queued writes.
///
/// This is either a permanent id issued by the remote auth system or a
/// temporary one created on the device before registration completed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wraps an owner id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a document within a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wraps a document id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a temporary id for a document created while offline.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMPORARY_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Returns true if the id starts with any of the given temporary prefixes.
    pub fn is_temporary<S: AsRef<str>>(&self, prefixes: &[S]) -> bool {
        prefixes.iter().any(|p| self.0.starts_with(p.as_ref()))
    }

    /// Returns true for the empty id, which is never a valid document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
