//! Payload sanitization before transmission to the remote store.

use harbor_types::{CollectionSchema, Fields, Value};

/// Prepares a queued payload for the remote store.
///
/// - drops the top-level `id` (the remote addresses documents by path)
/// - drops, at every depth, keys starting with `local_prefix`
/// - turns the schema's time-valued fields into native timestamps
///
/// An empty `local_prefix` strips nothing.
pub fn sanitize_payload(payload: &Fields, schema: &CollectionSchema, local_prefix: &str) -> Fields {
    let mut out = strip_map(payload, local_prefix);
    out.remove("id");
    schema.type_time_fields(&mut out);
    out
}

fn is_local(key: &str, local_prefix: &str) -> bool {
    !local_prefix.is_empty() && key.starts_with(local_prefix)
}

fn strip_map(fields: &Fields, local_prefix: &str) -> Fields {
    fields
        .iter()
        .filter(|(key, _)| !is_local(key, local_prefix))
        .map(|(key, value)| (key.clone(), strip_value(value, local_prefix)))
        .collect()
}

fn strip_value(value: &Value, local_prefix: &str) -> Value {
    match value {
        Value::Map(map) => Value::Map(strip_map(map, local_prefix)),
        Value::Array(items) => Value::Array(items.iter().map(|v| strip_value(v, local_prefix)).collect()),
        other => other.clone(),
    }
}
