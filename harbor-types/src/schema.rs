//! Per-collection schemas.
//!
//! A schema names the fields the engine treats specially:
//! - `preserved_fields`: values computed on the device that an incomplete
//!   remote snapshot must not erase.
//! - `time_fields`: time-valued field paths (`/reminder/at` style). Only these
//!   are converted between strings and timestamps.
//! - `archive_field`: boolean flag marking soft-deleted records.

use crate::time::{format_canonical, from_epoch_millis, parse_timestamp};
use crate::{Fields, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default name of the soft-delete flag.
pub const DEFAULT_ARCHIVE_FIELD: &str = "archived";

/// Describes how the engine treats one collection's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub collection: String,
    #[serde(default)]
    pub preserved_fields: Vec<String>,
    #[serde(default)]
    pub time_fields: Vec<String>,
    #[serde(default = "default_archive_field")]
    pub archive_field: String,
}

fn default_archive_field() -> String {
    DEFAULT_ARCHIVE_FIELD.to_string()
}

impl CollectionSchema {
    /// Creates a schema with no special fields.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            preserved_fields: Vec::new(),
            time_fields: Vec::new(),
            archive_field: default_archive_field(),
        }
    }

    /// Adds a client-preserved field.
    #[must_use]
    pub fn preserve(mut self, field: impl Into<String>) -> Self {
        self.preserved_fields.push(field.into());
        self
    }

    /// Adds a time-valued field path.
    #[must_use]
    pub fn time_field(mut self, path: impl Into<String>) -> Self {
        self.time_fields.push(path.into());
        self
    }

    #[must_use]
    pub fn archive_field(mut self, field: impl Into<String>) -> Self {
        self.archive_field = field.into();
        self
    }

    /// Renders every timestamp in canonical string form.
    ///
    /// All `Timestamp` values anywhere in the tree become strings. Strings and
    /// epoch-millisecond integers at the schema's time paths are parsed and
    /// re-rendered; values that do not parse are left as they are.
    pub fn canonicalize(&self, fields: &mut Fields) {
        canonicalize_map(fields);
        for path in &self.time_fields {
            visit_path(fields, &segments(path), &mut |value| {
                let parsed = match value {
                    Value::String(s) => parse_timestamp(s).ok(),
                    Value::Integer(ms) => from_epoch_millis(*ms).ok(),
                    _ => None,
                };
                if let Some(ts) = parsed {
                    *value = Value::String(format_canonical(&ts));
                }
            });
        }
    }

    /// Converts values at the schema's time paths into `Timestamp`s.
    pub fn type_time_fields(&self, fields: &mut Fields) {
        for path in &self.time_fields {
            visit_path(fields, &segments(path), &mut |value| {
                let parsed = match value {
                    Value::String(s) => parse_timestamp(s).ok(),
                    Value::Integer(ms) => from_epoch_millis(*ms).ok(),
                    _ => None,
                };
                if let Some(ts) = parsed {
                    *value = Value::Timestamp(ts);
                }
            });
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn canonicalize_value(value: &mut Value) {
    match value {
        Value::Timestamp(ts) => *value = Value::String(format_canonical(ts)),
        Value::Array(items) => items.iter_mut().for_each(canonicalize_value),
        Value::Map(map) => canonicalize_map(map),
        _ => {}
    }
}

fn canonicalize_map(fields: &mut Fields) {
    fields.values_mut().for_each(canonicalize_value);
}

/// Applies `f` to every value reachable at `path`. Arrays met along the way
/// are fanned out over their elements.
fn visit_path(fields: &mut Fields, path: &[&str], f: &mut dyn FnMut(&mut Value)) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if let Some(value) = fields.get_mut(*head) {
        visit_value(value, rest, f);
    }
}

fn visit_value(value: &mut Value, rest: &[&str], f: &mut dyn FnMut(&mut Value)) {
    match value {
        Value::Array(items) => {
            for item in items {
                visit_value(item, rest, f);
            }
        }
        Value::Map(map) if !rest.is_empty() => visit_path(map, rest, f),
        _ if rest.is_empty() => f(value),
        _ => {}
    }
}

/// Lookup of collection schemas with a fallback for unregistered collections.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, CollectionSchema>,
    fallback: CollectionSchema,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            fallback: CollectionSchema::new("*"),
        }
    }

    /// Registers (or replaces) a collection schema.
    pub fn register(&mut self, schema: CollectionSchema) {
        self.schemas.insert(schema.collection.clone(), schema);
    }

    /// Returns the schema for a collection, or the empty fallback.
    pub fn schema_for(&self, collection: &str) -> &CollectionSchema {
        self.schemas.get(collection).unwrap_or(&self.fallback)
    }

    pub fn is_registered(&self, collection: &str) -> bool {
        self.schemas.contains_key(collection)
    }
}
