use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use unistore_model::{BackendKind, Cursor, EntityManifest, FieldMap, Filters};
use unistore_storage::{BackendAdapter, DocumentAdapter, StorageError};
use unistore_types::Domain;

fn adapter() -> DocumentAdapter {
    let schema = EntityManifest::notes_default().backend_schema(Domain::Primary);
    DocumentAdapter::open_in_memory(2, schema).unwrap()
}

fn fields(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("test data must be an object"),
    }
}

#[tokio::test]
async fn create_assigns_id_and_reads_back() {
    let store = adapter();
    let created = store
        .create("note", fields(json!({"title": "hello", "pinned": true})))
        .await
        .unwrap();

    assert!(!created.id.is_empty());
    assert_eq!(created.created_at, created.modified_at);

    let result = store.get_by_id("note", &created.id).await.unwrap();
    assert_eq!(result.backend, BackendKind::DuckdbDocument);
    assert_eq!(result.count, 1);
    assert_eq!(result.first().unwrap(), &created);
}

#[tokio::test]
async fn create_rejects_caller_supplied_id() {
    let store = adapter();
    let err = store
        .create("note", fields(json!({"id": "mine", "title": "x"})))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn unserved_entity_type_is_rejected() {
    let store = adapter();
    let err = store.create("agent-state", FieldMap::new()).await.unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn get_by_id_missing_is_empty_not_error() {
    let store = adapter();
    let result = store.get_by_id("note", "does-not-exist").await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.count, 0);
}

#[tokio::test]
async fn update_merges_top_level_fields() {
    let store = adapter();
    let created = store
        .create("note", fields(json!({"title": "a", "body": "keep"})))
        .await
        .unwrap();

    let updated = store
        .update("note", &created.id, fields(json!({"title": "b", "tag": "x"})))
        .await
        .unwrap();

    assert_eq!(updated.get_str("title"), Some("b"));
    assert_eq!(updated.get_str("body"), Some("keep"));
    assert_eq!(updated.get_str("tag"), Some("x"));
    assert!(updated.modified_at >= created.modified_at);
    assert_eq!(updated.created_at, created.created_at);
}

#[tokio::test]
async fn update_missing_is_not_found() {
    let store = adapter();
    let err = store
        .update("note", "nope", fields(json!({"title": "b"})))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_twice_returns_true_then_false() {
    let store = adapter();
    let created = store.create("note", FieldMap::new()).await.unwrap();

    assert!(store.delete("note", &created.id).await.unwrap());
    assert!(!store.delete("note", &created.id).await.unwrap());
    assert!(store.get_by_id("note", &created.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn query_filters_and_orders_by_id() {
    let store = adapter();
    let mut ids = Vec::new();
    for i in 0..5 {
        let e = store
            .create("note", fields(json!({"rank": i, "kind": if i % 2 == 0 { "even" } else { "odd" }})))
            .await
            .unwrap();
        ids.push(e.id);
    }

    let filters = Filters::parse(&json!({"kind": "even", "rank": {"$gte": 1}})).unwrap();
    let result = store.query("note", &filters, 10, None).await.unwrap();

    let got: Vec<&str> = result.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(got, vec![ids[2].as_str(), ids[4].as_str()]);
    assert!(result.next_cursor.is_none());
}

#[tokio::test]
async fn query_null_matches_missing_fields() {
    let store = adapter();
    store.create("note", fields(json!({"archived": true}))).await.unwrap();
    let bare = store.create("note", FieldMap::new()).await.unwrap();

    let filters = Filters::parse(&json!({"archived": null})).unwrap();
    let result = store.query("note", &filters, 10, None).await.unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(result.first().unwrap().id, bare.id);
}

#[tokio::test]
async fn query_paginates_with_cursor() {
    let store = adapter();
    for i in 0..5 {
        store.create("note", fields(json!({"n": i}))).await.unwrap();
    }

    let first = store.query("note", &Filters::none(), 2, None).await.unwrap();
    assert_eq!(first.count, 2);
    let cursor = first.next_cursor.clone().unwrap();

    let second = store.query("note", &Filters::none(), 2, Some(&cursor)).await.unwrap();
    assert_eq!(second.count, 2);
    assert!(second.items[0].id > first.items[1].id);

    let third = store
        .query("note", &Filters::none(), 2, second.next_cursor.as_ref())
        .await
        .unwrap();
    assert_eq!(third.count, 1);
    assert!(third.next_cursor.is_none());
}

#[tokio::test]
async fn query_rejects_bad_limit_and_cursor() {
    let store = adapter();
    let zero = store.query("note", &Filters::none(), 0, None).await.unwrap_err();
    assert!(zero.is_validation());

    let bogus = Cursor::from_token("!!not-base64!!");
    let err = store.query("note", &Filters::none(), 5, Some(&bogus)).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn forward_and_reverse_relations_walk_edges() {
    let store = adapter();
    let container = store.create("container", fields(json!({"name": "inbox"}))).await.unwrap();
    let a = store
        .create("note", fields(json!({"title": "a", "container_id": container.id})))
        .await
        .unwrap();
    let b = store
        .create("note", fields(json!({"title": "b", "container_id": container.id, "links": [a.id]})))
        .await
        .unwrap();

    let notes = store.get_related("container", &container.id, "notes").await.unwrap();
    let ids: Vec<&str> = notes.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);

    let parent = store.get_related("note", &a.id, "container").await.unwrap();
    assert_eq!(parent.first().unwrap().id, container.id);

    let links = store.get_related("note", &b.id, "links").await.unwrap();
    assert_eq!(links.first().unwrap().id, a.id);

    let backlinks = store.get_related("note", &a.id, "backlinks").await.unwrap();
    assert_eq!(backlinks.first().unwrap().id, b.id);
}

#[tokio::test]
async fn edges_follow_updates() {
    let store = adapter();
    let first = store.create("container", FieldMap::new()).await.unwrap();
    let second = store.create("container", FieldMap::new()).await.unwrap();
    let note = store
        .create("note", fields(json!({"container_id": first.id})))
        .await
        .unwrap();

    store
        .update("note", &note.id, fields(json!({"container_id": second.id})))
        .await
        .unwrap();

    assert!(store.get_related("container", &first.id, "notes").await.unwrap().is_empty());
    assert_eq!(store.get_related("container", &second.id, "notes").await.unwrap().count, 1);
    assert_eq!(store.link_count(&note.id).await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_relation_is_validation_and_unknown_source_is_empty() {
    let store = adapter();
    let err = store.get_related("note", "x", "siblings").await.unwrap_err();
    assert!(err.is_validation());

    let empty = store.get_related("container", "missing", "notes").await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("primary.duckdb");
    let schema = EntityManifest::notes_default().backend_schema(Domain::Primary);

    let id = {
        let store = DocumentAdapter::open(&path, 2, schema.clone()).unwrap();
        store.create("note", fields(json!({"title": "kept"}))).await.unwrap().id
    };

    let store = DocumentAdapter::open(&path, 1, schema).unwrap();
    let found = store.get_by_id("note", &id).await.unwrap();
    assert_eq!(found.first().unwrap().get_str("title"), Some("kept"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_all_land() {
    let store = std::sync::Arc::new(adapter());
    let tasks = (0..16).map(|i| {
        let store = store.clone();
        async move { store.create("note", fields(json!({"n": i}))).await }
    });
    let results = futures::future::join_all(tasks).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let all = store.query("note", &Filters::none(), 100, None).await.unwrap();
    assert_eq!(all.count, 16);
}
