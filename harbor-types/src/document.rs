//! Documents as seen by the engine: an id plus an open map of fields.

use crate::{DocumentId, Error, Fields, OwnerId, Result, Value};
use serde::{Deserialize, Serialize};

/// A document in a cached or remote collection.
///
/// Serializes flat, as `{"id": "...", ...fields}`. The `id` key never appears
/// inside `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    /// Creates an empty document.
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    /// Creates a document from a field map, dropping any `id` entry in it.
    pub fn from_fields(id: impl Into<DocumentId>, mut fields: Fields) -> Self {
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Parses a document from JSON, rejecting a missing or empty id.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Document = serde_json::from_str(json)?;
        if doc.id.is_empty() {
            return Err(Error::InvalidDocument("empty document id".into()));
        }
        Ok(doc)
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sets a field. Setting `id` is ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != "id" {
            self.fields.insert(key, value.into());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Returns true if the field is present and not null.
    #[must_use]
    pub fn has_value(&self, key: &str) -> bool {
        self.fields.get(key).is_some_and(|v| !v.is_null())
    }

    /// Shallow merge: every top-level entry of `patch` replaces ours.
    pub fn merge(&mut self, patch: &Fields) {
        for (key, value) in patch {
            if key != "id" {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Returns true if the archive flag field is `true`.
    #[must_use]
    pub fn is_archived(&self, archive_field: &str) -> bool {
        self.fields
            .get(archive_field)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns true if any of the owner fields names an identity other than
    /// `owner`. Documents without owner fields never conflict.
    pub fn owner_conflicts<S: AsRef<str>>(&self, owner_fields: &[S], owner: Option<&OwnerId>) -> bool {
        owner_fields.iter().any(|field| {
            match self.fields.get(field.as_ref()).and_then(Value::as_str) {
                Some(stored) => owner.is_none_or(|o| o.as_str() != stored),
                None => false,
            }
        })
    }

    /// Consumes the document and returns its fields including `id`.
    #[must_use]
    pub fn into_fields_with_id(self) -> Fields {
        let mut fields = self.fields;
        fields.insert("id".to_string(), Value::String(self.id.to_string()));
        fields
    }
}
