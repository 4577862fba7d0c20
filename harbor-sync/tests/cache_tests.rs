mod common;

use chrono::{TimeZone, Utc};
use common::{ITEMS, doc, fields, ids, owner, test_config};
use harbor_storage::{KeyValueStore, MemoryKvStore};
use harbor_sync::LocalCache;
use harbor_types::{Document, DocumentId, Value};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn cache() -> (LocalCache, Arc<MemoryKvStore>) {
    let kv = Arc::new(MemoryKvStore::new());
    let config = test_config();
    let cache = LocalCache::new(
        kv.clone(),
        &config.key_prefix,
        Arc::new(config.schema_registry()),
        config.owner_fields.clone(),
    );
    (cache, kv)
}

// ── Basic operations ─────────────────────────────────────────────

#[tokio::test]
async fn absent_collection_is_empty() {
    let (cache, _) = cache();
    assert!(cache.get(ITEMS, Some(&owner("u1"))).await.is_empty());
    assert!(cache.load(ITEMS, Some(&owner("u1"))).await.is_none());
}

#[tokio::test]
async fn save_replaces_items() {
    let (cache, kv) = cache();
    let u1 = owner("u1");
    cache
        .save(ITEMS, Some(&u1), vec![doc(json!({"id": "a"})), doc(json!({"id": "b"}))])
        .await
        .unwrap();
    cache.save(ITEMS, Some(&u1), vec![doc(json!({"id": "c"}))]).await.unwrap();

    assert_eq!(ids(&cache.get(ITEMS, Some(&u1)).await), vec!["c"]);
    assert!(kv.get("harbor/cache/u1/items").await.unwrap().is_some());
}

#[tokio::test]
async fn save_deduplicates_and_drops_empty_ids() {
    let (cache, _) = cache();
    let u1 = owner("u1");
    let items = vec![
        doc(json!({"id": "a", "v": 1})),
        Document::new(""),
        doc(json!({"id": "b"})),
        doc(json!({"id": "a", "v": 2})),
    ];
    cache.save(ITEMS, Some(&u1), items).await.unwrap();

    let stored = cache.get(ITEMS, Some(&u1)).await;
    assert_eq!(ids(&stored), vec!["a", "b"]);
    assert_eq!(stored[0].get("v"), Some(&Value::Integer(2)));
}

#[tokio::test]
async fn upsert_update_merge_remove() {
    let (cache, _) = cache();
    let u1 = owner("u1");
    let id = DocumentId::new("m1");

    cache
        .upsert_one(ITEMS, Some(&u1), doc(json!({"id": "m1", "name": "x", "done": false})))
        .await
        .unwrap();
    assert!(cache.update_one(ITEMS, Some(&u1), &id, &fields(json!({"done": true}))).await.unwrap());
    assert!(
        !cache
            .update_one(ITEMS, Some(&u1), &DocumentId::new("missing"), &fields(json!({"done": true})))
            .await
            .unwrap()
    );

    let stored = cache.get_one(ITEMS, Some(&u1), &id).await.unwrap();
    assert_eq!(stored, doc(json!({"id": "m1", "name": "x", "done": true})));

    // Upsert replaces the whole document
    cache.upsert_one(ITEMS, Some(&u1), doc(json!({"id": "m1"}))).await.unwrap();
    assert!(cache.get_one(ITEMS, Some(&u1), &id).await.unwrap().fields.is_empty());

    // Merge creates when absent
    cache
        .merge_one(ITEMS, Some(&u1), &DocumentId::new("m2"), &fields(json!({"name": "y"})))
        .await
        .unwrap();
    assert_eq!(ids(&cache.get(ITEMS, Some(&u1)).await), vec!["m1", "m2"]);

    assert!(cache.remove_one(ITEMS, Some(&u1), &id).await.unwrap());
    assert!(!cache.remove_one(ITEMS, Some(&u1), &id).await.unwrap());
    assert_eq!(ids(&cache.get(ITEMS, Some(&u1)).await), vec!["m2"]);
}

#[tokio::test]
async fn clear_drops_collection() {
    let (cache, _) = cache();
    let u1 = owner("u1");
    cache.save(ITEMS, Some(&u1), vec![doc(json!({"id": "a"}))]).await.unwrap();
    cache.clear(ITEMS, Some(&u1)).await.unwrap();
    assert!(cache.load(ITEMS, Some(&u1)).await.is_none());
}

#[tokio::test]
async fn synced_transform_stamps_last_synced_at() {
    let (cache, _) = cache();
    let u1 = owner("u1");
    cache.save(ITEMS, Some(&u1), vec![doc(json!({"id": "a"}))]).await.unwrap();
    assert!(cache.load(ITEMS, Some(&u1)).await.unwrap().last_synced_at.is_none());

    cache.transform(ITEMS, Some(&u1), true, |items| (items, ())).await.unwrap();
    let loaded = cache.load(ITEMS, Some(&u1)).await.unwrap();
    assert_eq!(loaded.last_synced_at, Some(loaded.cached_at));
    assert_eq!(loaded.owner_id, Some(u1));
    assert_eq!(loaded.collection, ITEMS);
}

// ── Normalization ────────────────────────────────────────────────

#[tokio::test]
async fn timestamps_are_stored_canonically() {
    let (cache, _) = cache();
    let u1 = owner("u1");
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

    let native = Document::new("a").with_field("dueAt", at);
    let iso_offset = doc(json!({"id": "b", "dueAt": "2024-05-01T12:00:00+02:00"}));
    let millis = doc(json!({"id": "c", "dueAt": at.timestamp_millis()}));
    let untagged = doc(json!({"id": "d", "note": "2024-05-01T12:00:00+02:00"}));
    cache
        .save(ITEMS, Some(&u1), vec![native, iso_offset, millis, untagged])
        .await
        .unwrap();

    let stored = cache.get(ITEMS, Some(&u1)).await;
    let canonical = Value::from("2024-05-01T10:00:00.000Z");
    assert_eq!(stored[0].get("dueAt"), Some(&canonical));
    assert_eq!(stored[1].get("dueAt"), Some(&canonical));
    assert_eq!(stored[2].get("dueAt"), Some(&canonical));
    // Fields outside the schema's time fields are left alone
    assert_eq!(stored[3].get("note"), Some(&Value::from("2024-05-01T12:00:00+02:00")));
}

// ── Defensive reads ──────────────────────────────────────────────

#[tokio::test]
async fn owners_are_isolated() {
    let (cache, _) = cache();
    cache
        .save(ITEMS, Some(&owner("u1")), vec![doc(json!({"id": "a"}))])
        .await
        .unwrap();
    assert!(cache.get(ITEMS, Some(&owner("u2"))).await.is_empty());
    assert!(cache.get(ITEMS, None).await.is_empty());
}

#[tokio::test]
async fn foreign_owner_field_discards_collection() {
    let (cache, kv) = cache();
    let u1 = owner("u1");
    cache
        .save(
            ITEMS,
            Some(&u1),
            vec![doc(json!({"id": "a", "userId": "u1"})), doc(json!({"id": "b", "ownerId": "u9"}))],
        )
        .await
        .unwrap();

    assert!(cache.get(ITEMS, Some(&u1)).await.is_empty());
    assert!(kv.get("harbor/cache/u1/items").await.unwrap().is_none());
}

#[tokio::test]
async fn matching_owner_fields_are_kept() {
    let (cache, _) = cache();
    let u1 = owner("u1");
    cache
        .save(ITEMS, Some(&u1), vec![doc(json!({"id": "a", "userId": "u1", "ownerId": "u1"}))])
        .await
        .unwrap();
    assert_eq!(cache.get(ITEMS, Some(&u1)).await.len(), 1);
}

#[tokio::test]
async fn unreadable_blob_reads_as_absent() {
    let (cache, kv) = cache();
    kv.set("harbor/cache/u1/items", "{broken".into()).await.unwrap();
    assert!(cache.get(ITEMS, Some(&owner("u1"))).await.is_empty());
}

#[tokio::test]
async fn failing_backend_reads_as_absent() {
    let (cache, kv) = cache();
    let u1 = owner("u1");
    cache.save(ITEMS, Some(&u1), vec![doc(json!({"id": "a"}))]).await.unwrap();

    kv.set_fail_reads(true);
    assert!(cache.get(ITEMS, Some(&u1)).await.is_empty());
    kv.set_fail_reads(false);
    assert_eq!(cache.get(ITEMS, Some(&u1)).await.len(), 1);
}

#[tokio::test]
async fn owner_and_collection_segments_are_encoded() {
    let (cache, kv) = cache();
    let odd = owner("a/b");
    cache.save("x/y", Some(&odd), vec![doc(json!({"id": "a"}))]).await.unwrap();
    assert!(kv.get("harbor/cache/a%2Fb/x%2Fy").await.unwrap().is_some());
    assert!(cache.get("y", Some(&owner("a/b/x"))).await.is_empty());
}
