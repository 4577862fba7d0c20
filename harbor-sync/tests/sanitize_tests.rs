mod common;

use chrono::{TimeZone, Utc};
use common::{ITEMS, fields};
use harbor_sync::sanitize_payload;
use harbor_types::{CollectionSchema, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

fn schema() -> CollectionSchema {
    CollectionSchema::new(ITEMS).time_field("dueAt").time_field("/reminders/at")
}

#[test]
fn drops_top_level_id() {
    let out = sanitize_payload(&fields(json!({"id": "m1", "name": "x"})), &schema(), "_");
    assert_eq!(out, fields(json!({"name": "x"})));
}

#[test]
fn strips_local_keys_at_every_depth() {
    let payload = fields(json!({
        "_draft": true,
        "name": "x",
        "meta": {"_cursor": 4, "tag": "a"},
        "list": [{"_tmp": 1, "keep": 2}]
    }));
    let out = sanitize_payload(&payload, &schema(), "_");
    assert_eq!(
        out,
        fields(json!({
            "name": "x",
            "meta": {"tag": "a"},
            "list": [{"keep": 2}]
        }))
    );
}

#[test]
fn empty_prefix_strips_nothing() {
    let payload = fields(json!({"_draft": true, "name": "x"}));
    assert_eq!(sanitize_payload(&payload, &schema(), ""), payload);
}

#[test]
fn time_fields_become_native_timestamps() {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let payload = fields(json!({
        "dueAt": "2024-05-01T10:00:00.000Z",
        "reminders": [{"at": at.timestamp_millis()}, {"at": "not a time"}],
        "note": "2024-05-01T10:00:00.000Z"
    }));
    let out = sanitize_payload(&payload, &schema(), "_");

    assert_eq!(out.get("dueAt"), Some(&Value::Timestamp(at)));
    let reminders = match out.get("reminders") {
        Some(Value::Array(items)) => items.clone(),
        other => panic!("unexpected reminders: {other:?}"),
    };
    assert_eq!(reminders[0].as_map().unwrap().get("at"), Some(&Value::Timestamp(at)));
    assert_eq!(reminders[1].as_map().unwrap().get("at"), Some(&Value::from("not a time")));
    assert_eq!(out.get("note"), Some(&Value::from("2024-05-01T10:00:00.000Z")));
}

#[test]
fn input_is_left_untouched() {
    let payload = fields(json!({"id": "m1", "_draft": true}));
    let before = payload.clone();
    let _ = sanitize_payload(&payload, &schema(), "_");
    assert_eq!(payload, before);
}
