use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use unistore_model::{BackendKind, Cursor, Entity, FilterError, QueryResult, validate_limit};
use std::time::Instant;

fn make_entity(fields: Value) -> Entity {
    Entity {
        id: "ent-1".to_string(),
        entity_type: "note".to_string(),
        fields: fields.as_object().cloned().unwrap(),
        created_at: 1000,
        modified_at: 2000,
    }
}

// ── Field access ─────────────────────────────────────────────────

#[test]
fn typed_getters() {
    let e = make_entity(json!({"title": "My Note", "pinned": true, "count": 5}));
    assert_eq!(e.get_str("title"), Some("My Note"));
    assert_eq!(e.get_bool("pinned"), Some(true));
    assert_eq!(e.get_number("count"), Some(5.0));
    assert_eq!(e.get_str("count"), None);
    assert_eq!(e.get("missing"), None);
}

#[test]
fn patch_overwrites_supplied_fields_only_and_keeps_order() {
    let mut e = make_entity(json!({"title": "a", "body": "b", "tags": []}));
    let patch = json!({"body": "changed", "extra": 1}).as_object().cloned().unwrap();
    e.apply_patch(patch, 3000);

    let keys: Vec<&str> = e.fields.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["title", "body", "tags", "extra"]);
    assert_eq!(e.get_str("title"), Some("a"));
    assert_eq!(e.get_str("body"), Some("changed"));
    assert_eq!(e.modified_at, 3000);
    assert_eq!(e.created_at, 1000);
}

#[test]
fn linked_ids_accepts_string_or_array() {
    let e = make_entity(json!({"one": "x", "many": ["a", 3, "b"], "num": 4}));
    assert_eq!(e.linked_ids("one"), vec!["x".to_string()]);
    assert_eq!(e.linked_ids("many"), vec!["a".to_string(), "b".to_string()]);
    assert!(e.linked_ids("num").is_empty());
    assert!(e.linked_ids("absent").is_empty());
}

#[test]
fn snapshot_roundtrip() {
    let e = make_entity(json!({"title": "x"}));
    let snapshot = e.to_snapshot();
    assert_eq!(snapshot["id"], "ent-1");
    assert_eq!(snapshot["fields"]["title"], "x");
    assert_eq!(Entity::from_snapshot(&snapshot), Some(e));
    assert_eq!(Entity::from_snapshot(&json!({"id": 1})), None);
}

// ── Cursors and limits ───────────────────────────────────────────

#[test]
fn cursor_roundtrip_is_opaque() {
    let cursor = Cursor::after("0190f6f2-aaaa-7000-8000-000000000001");
    assert!(!cursor.as_str().contains("0190f6f2"));
    assert_eq!(cursor.last_id().unwrap(), "0190f6f2-aaaa-7000-8000-000000000001");
}

#[test]
fn foreign_cursor_rejected() {
    assert_eq!(Cursor::from_token("???").last_id(), Err(FilterError::InvalidCursor));
    assert_eq!(Cursor::from_token("aGVsbG8").last_id(), Err(FilterError::InvalidCursor));
}

#[test]
fn limit_bounds() {
    assert!(validate_limit(1).is_ok());
    assert!(validate_limit(1000).is_ok());
    assert!(matches!(validate_limit(0), Err(FilterError::InvalidLimit { .. })));
    assert!(matches!(validate_limit(1001), Err(FilterError::InvalidLimit { .. })));
}

// ── QueryResult ──────────────────────────────────────────────────

#[test]
fn query_result_counts_items_and_names_backend() {
    let started = Instant::now();
    let result = QueryResult::new(vec![1, 2, 3], BackendKind::SqliteRelational, started, None);
    assert_eq!(result.count, 3);
    assert_eq!(result.backend.as_str(), "sqlite-relational");
    assert_eq!(result.first(), Some(&1));

    let empty: QueryResult<u8> = QueryResult::empty(BackendKind::DuckdbDocument, started);
    assert!(empty.is_empty());
    assert_eq!(empty.count, 0);
}

#[test]
fn query_result_serializes_elapsed_as_millis() {
    let result = QueryResult::new(vec!["a"], BackendKind::DuckdbDocument, Instant::now(), Some(Cursor::after("a")));
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["backend"], "duckdb-document");
    assert!(json["elapsed_ms"].is_u64());
    assert!(json["next_cursor"].is_string());
}
