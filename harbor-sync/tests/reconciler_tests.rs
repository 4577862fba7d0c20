mod common;

use chrono::{Duration, Utc};
use common::{ITEMS, doc, fields, ids, owner};
use harbor_sync::Reconciler;
use harbor_types::{CollectionSchema, Document, Fields, Operation, OperationKind, Value};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn schema() -> CollectionSchema {
    CollectionSchema::new(ITEMS).preserve("currentAlarmId")
}

fn temp_prefixes() -> Vec<String> {
    vec!["local_".to_string(), "temp_".to_string()]
}

fn queued(kind: OperationKind, id: &str, payload: Fields, offset_ms: i64) -> Operation {
    let mut op = Operation::new(kind, ITEMS, id, Some(owner("u1")), payload);
    op.enqueued_at = Utc::now() + Duration::milliseconds(offset_ms);
    op
}

fn merge(cached: &[Document], remote: Vec<Document>, ops: &[Operation]) -> Vec<Document> {
    let schema = schema();
    let prefixes = temp_prefixes();
    Reconciler::new(&schema, &prefixes).merge(cached, remote, ops)
}

// ── Remote items ─────────────────────────────────────────────────

#[test]
fn remote_snapshot_replaces_server_fields() {
    let cached = vec![doc(json!({"id": "a", "name": "old"}))];
    let remote = vec![doc(json!({"id": "a", "name": "new"})), doc(json!({"id": "b"}))];
    let merged = merge(&cached, remote, &[]);
    assert_eq!(merged, vec![doc(json!({"id": "a", "name": "new"})), doc(json!({"id": "b"}))]);
}

#[test]
fn items_missing_from_remote_are_dropped() {
    let cached = vec![doc(json!({"id": "gone"}))];
    assert!(merge(&cached, vec![], &[]).is_empty());
}

#[test]
fn pending_delete_hides_remote_echo() {
    let remote = vec![doc(json!({"id": "x", "name": "stale"})), doc(json!({"id": "y"}))];
    let ops = vec![queued(OperationKind::Delete, "x", Fields::new(), 0)];
    assert_eq!(ids(&merge(&[], remote, &ops)), vec!["y"]);
}

#[test]
fn pending_update_wins_over_remote_fields() {
    let remote = vec![doc(json!({"id": "a", "name": "remote", "count": 1}))];
    let ops = vec![queued(OperationKind::Update, "a", fields(json!({"name": "local"})), 0)];
    let merged = merge(&[], remote, &ops);
    assert_eq!(merged, vec![doc(json!({"id": "a", "name": "local", "count": 1}))]);
}

#[test]
fn latest_queued_operation_decides() {
    let remote = vec![doc(json!({"id": "a", "name": "remote"}))];

    // Delete then update: the update is visible
    let ops = vec![
        queued(OperationKind::Delete, "a", Fields::new(), 0),
        queued(OperationKind::Update, "a", fields(json!({"name": "again"})), 10),
    ];
    assert_eq!(
        merge(&[], remote.clone(), &ops),
        vec![doc(json!({"id": "a", "name": "again"}))]
    );

    // Update then delete: the item is hidden
    let ops = vec![
        queued(OperationKind::Update, "a", fields(json!({"name": "edit"})), 0),
        queued(OperationKind::Delete, "a", Fields::new(), 10),
    ];
    assert!(merge(&[], remote, &ops).is_empty());
}

#[test]
fn equal_timestamps_resolve_to_later_entry() {
    let remote = vec![doc(json!({"id": "a", "v": 0}))];
    let first = queued(OperationKind::Update, "a", fields(json!({"v": 1})), 0);
    let mut second = queued(OperationKind::Update, "a", fields(json!({"v": 2})), 0);
    second.enqueued_at = first.enqueued_at;
    let merged = merge(&[], remote, &[first, second]);
    assert_eq!(merged[0].get("v"), Some(&Value::Integer(2)));
}

#[test]
fn queue_position_outranks_clock() {
    // The second write carries an earlier wall-clock time
    let remote = vec![doc(json!({"id": "a", "v": 0}))];
    let ops = vec![
        queued(OperationKind::Update, "a", fields(json!({"v": 1})), 0),
        queued(OperationKind::Update, "a", fields(json!({"v": 2})), -2_000),
    ];
    assert_eq!(merge(&[], remote.clone(), &ops)[0].get("v"), Some(&Value::Integer(2)));

    let ops = vec![
        queued(OperationKind::Update, "a", fields(json!({"v": 1})), 0),
        queued(OperationKind::Delete, "a", Fields::new(), -2_000),
    ];
    assert!(merge(&[], remote, &ops).is_empty());
}

// ── Client-preserved fields ──────────────────────────────────────

#[test]
fn preserved_field_survives_snapshot_without_it() {
    let cached = vec![doc(json!({"id": "m1", "currentAlarmId": "a1", "name": "x"}))];
    let remote = vec![doc(json!({"id": "m1", "name": "y"}))];
    let merged = merge(&cached, remote, &[]);
    assert_eq!(merged, vec![doc(json!({"id": "m1", "currentAlarmId": "a1", "name": "y"}))]);
}

#[test]
fn remote_value_for_preserved_field_wins() {
    let cached = vec![doc(json!({"id": "m1", "currentAlarmId": "a1"}))];
    let remote = vec![doc(json!({"id": "m1", "currentAlarmId": "a2"}))];
    assert_eq!(merge(&cached, remote, &[])[0].get("currentAlarmId"), Some(&Value::from("a2")));
}

#[test]
fn explicit_remote_null_is_not_overridden() {
    let cached = vec![doc(json!({"id": "m1", "currentAlarmId": "a1"}))];
    let remote = vec![doc(json!({"id": "m1", "currentAlarmId": null}))];
    assert_eq!(merge(&cached, remote, &[])[0].get("currentAlarmId"), Some(&Value::Null));
}

#[test]
fn null_local_value_is_not_preserved() {
    let cached = vec![doc(json!({"id": "m1", "currentAlarmId": null}))];
    let remote = vec![doc(json!({"id": "m1"}))];
    assert!(merge(&cached, remote, &[])[0].get("currentAlarmId").is_none());
}

#[test]
fn fields_outside_allow_list_are_not_preserved() {
    let cached = vec![doc(json!({"id": "m1", "draft": "local"}))];
    let remote = vec![doc(json!({"id": "m1"}))];
    assert!(merge(&cached, remote, &[])[0].get("draft").is_none());
}

// ── Not-yet-synced local items ───────────────────────────────────

#[test]
fn queued_create_missing_from_remote_is_appended() {
    let cached = vec![doc(json!({"id": "t1", "name": "x"}))];
    let ops = vec![queued(OperationKind::Create, "t1", fields(json!({"name": "x"})), 0)];
    let remote = vec![doc(json!({"id": "r1"}))];
    let merged = merge(&cached, remote, &ops);
    assert_eq!(merged, vec![doc(json!({"id": "r1"})), doc(json!({"id": "t1", "name": "x"}))]);
}

#[test]
fn queued_create_without_cached_copy_is_replayed() {
    let ops = vec![
        queued(OperationKind::Create, "t1", fields(json!({"name": "x", "n": 1})), 0),
        queued(OperationKind::Update, "t1", fields(json!({"n": 2})), 10),
    ];
    let merged = merge(&[], vec![], &ops);
    assert_eq!(merged, vec![doc(json!({"id": "t1", "name": "x", "n": 2}))]);
}

#[test]
fn queued_create_then_delete_is_not_appended() {
    let ops = vec![
        queued(OperationKind::Create, "t1", fields(json!({"name": "x"})), 0),
        queued(OperationKind::Delete, "t1", Fields::new(), 10),
    ];
    assert!(merge(&[], vec![], &ops).is_empty());
}

#[test]
fn queued_create_present_remotely_merges_payload() {
    let cached = vec![doc(json!({"id": "t1", "name": "x", "currentAlarmId": "a1"}))];
    let ops = vec![queued(OperationKind::Create, "t1", fields(json!({"name": "x"})), 0)];
    let remote = vec![doc(json!({"id": "t1", "createdBy": "server"}))];
    let merged = merge(&cached, remote, &ops);
    assert_eq!(
        merged,
        vec![doc(json!({"id": "t1", "name": "x", "createdBy": "server", "currentAlarmId": "a1"}))]
    );
}

#[test]
fn archived_and_temporary_items_outside_snapshot_are_kept() {
    let cached = vec![
        doc(json!({"id": "old", "archived": true})),
        doc(json!({"id": "local_123", "name": "draft"})),
        doc(json!({"id": "temp_9"})),
        doc(json!({"id": "plain"})),
        doc(json!({"id": "notflag", "archived": "yes"})),
    ];
    let merged = merge(&cached, vec![doc(json!({"id": "r"}))], &[]);
    assert_eq!(ids(&merged), vec!["r", "old", "local_123", "temp_9"]);
}

#[test]
fn archived_item_with_pending_delete_is_dropped() {
    let cached = vec![doc(json!({"id": "old", "archived": true}))];
    let ops = vec![queued(OperationKind::Delete, "old", Fields::new(), 0)];
    assert!(merge(&cached, vec![], &ops).is_empty());
}

#[test]
fn custom_archive_field_is_honored() {
    let schema = CollectionSchema::new(ITEMS).archive_field("isDeleted");
    let prefixes = temp_prefixes();
    let cached = vec![doc(json!({"id": "a", "isDeleted": true})), doc(json!({"id": "b", "archived": true}))];
    let merged = Reconciler::new(&schema, &prefixes).merge(&cached, vec![], &[]);
    assert_eq!(ids(&merged), vec!["a"]);
}

#[test]
fn duplicate_remote_ids_are_collapsed() {
    let remote = vec![doc(json!({"id": "a", "v": 1})), doc(json!({"id": "a", "v": 2}))];
    let merged = merge(&[], remote, &[]);
    assert_eq!(merged.len(), 1);
}

// ── Properties ───────────────────────────────────────────────────

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z]{1,4}"
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z0-9]{0,6}".prop_map(Value::String),
    ]
}

fn arb_doc() -> impl Strategy<Value = Document> {
    (arb_id(), prop::collection::btree_map("[a-z]{1,3}", arb_scalar(), 0..4))
        .prop_map(|(id, fields)| Document::from_fields(id, fields))
}

proptest! {
    #[test]
    fn preserved_field_never_lost_when_remote_omits_it(
        id in arb_id(),
        alarm in "[a-z0-9]{1,8}",
        remote_fields in prop::collection::btree_map("[a-z]{1,3}", arb_scalar(), 0..4),
        others in prop::collection::vec(arb_doc(), 0..5),
    ) {
        let cached = vec![Document::new(id.as_str()).with_field("currentAlarmId", alarm.as_str())];
        let mut remote_fields = remote_fields;
        remote_fields.remove("currentAlarmId");
        let mut remote = vec![Document::from_fields(id.as_str(), remote_fields)];
        remote.extend(others.into_iter().filter(|d| d.id.as_str() != id));

        let merged = merge(&cached, remote, &[]);
        let item = merged.iter().find(|d| d.id.as_str() == id).unwrap();
        prop_assert_eq!(item.get("currentAlarmId"), Some(&Value::from(alarm.as_str())));
    }

    #[test]
    fn pending_delete_always_hides_item(
        id in arb_id(),
        remote in prop::collection::vec(arb_doc(), 0..6),
        cached in prop::collection::vec(arb_doc(), 0..6),
        archived in any::<bool>(),
    ) {
        let mut remote = remote;
        remote.push(Document::new(id.as_str()).with_field("archived", archived));
        let ops = vec![queued(OperationKind::Delete, &id, Fields::new(), 0)];

        let merged = merge(&cached, remote, &ops);
        prop_assert!(merged.iter().all(|d| d.id.as_str() != id));
    }

    #[test]
    fn merged_ids_are_unique_and_non_empty(
        remote in prop::collection::vec(arb_doc(), 0..8),
        cached in prop::collection::vec(arb_doc(), 0..8),
    ) {
        let merged = merge(&cached, remote, &[]);
        let mut seen = std::collections::HashSet::new();
        for d in &merged {
            prop_assert!(!d.id.is_empty());
            prop_assert!(seen.insert(d.id.clone()));
        }
    }
}
