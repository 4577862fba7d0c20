//! Layout of engine keys in the durable store.
//!
//! ```text
//! {prefix}/queue
//! {prefix}/cache/{owner}/{collection}
//! ```
//!
//! Owner and collection segments are percent-encoded, so a `/` inside a name
//! cannot leak into another namespace.

use harbor_types::OwnerId;
use urlencoding::encode;

/// Segment used for the owner-less (anonymous) namespace. `@` is always
/// percent-encoded in real owner segments, so this cannot collide.
const ANONYMOUS_SEGMENT: &str = "@anonymous";

#[derive(Debug, Clone)]
pub(crate) struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub(crate) fn queue(&self) -> String {
        format!("{}/queue", self.prefix)
    }

    pub(crate) fn cache(&self, owner: Option<&OwnerId>, collection: &str) -> String {
        format!("{}{}", self.cache_owner_prefix(owner), encode(collection))
    }

    /// Prefix shared by every cached collection of one owner.
    pub(crate) fn cache_owner_prefix(&self, owner: Option<&OwnerId>) -> String {
        let segment = match owner {
            Some(owner) => encode(owner.as_str()).into_owned(),
            None => ANONYMOUS_SEGMENT.to_string(),
        };
        format!("{}/cache/{}/", self.prefix, segment)
    }
}
