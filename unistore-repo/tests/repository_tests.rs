use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use unistore_model::{BackendKind, BackendSchema, Cursor, Entity, EntityManifest, FieldMap, Filters, IdPolicy, QueryResult};
use unistore_repo::{
    DomainRouter, ErrorKind, Operation, RepositoryConfig, RepositoryError, SyncDispatch, UnifiedRepository,
    UnistoreConfig, WriteOutcome, bootstrap_without_handlers,
};
use unistore_storage::{BackendAdapter, DocumentAdapter, RelationalAdapter, StorageError, StorageResult};
use unistore_sync::{SyncConfig, SyncEventType, SyncHookRegistry};
use unistore_types::Domain;

fn fields(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("test data must be an object"),
    }
}

fn repo() -> Arc<UnifiedRepository> {
    bootstrap_without_handlers(&UnistoreConfig::default()).unwrap()
}

/// Delegates to a real adapter, sleeping after each call completes.
struct SlowAdapter {
    inner: Arc<dyn BackendAdapter>,
    delay: Duration,
}

#[async_trait]
impl BackendAdapter for SlowAdapter {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn id_policy(&self) -> IdPolicy {
        self.inner.id_policy()
    }

    fn schema(&self) -> &BackendSchema {
        self.inner.schema()
    }

    async fn query(
        &self,
        entity_type: &str,
        filters: &Filters,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> StorageResult<QueryResult<Entity>> {
        self.inner.query(entity_type, filters, limit, cursor).await
    }

    async fn get_by_id(&self, entity_type: &str, id: &str) -> StorageResult<QueryResult<Entity>> {
        let result = self.inner.get_by_id(entity_type, id).await?;
        tokio::time::sleep(self.delay).await;
        Ok(result)
    }

    async fn create(&self, entity_type: &str, data: FieldMap) -> StorageResult<Entity> {
        let entity = self.inner.create(entity_type, data).await?;
        tokio::time::sleep(self.delay).await;
        Ok(entity)
    }

    async fn update(&self, entity_type: &str, id: &str, data: FieldMap) -> StorageResult<Entity> {
        self.inner.update(entity_type, id, data).await
    }

    async fn delete(&self, entity_type: &str, id: &str) -> StorageResult<bool> {
        self.inner.delete(entity_type, id).await
    }

    async fn get_related(&self, entity_type: &str, id: &str, relation: &str) -> StorageResult<QueryResult<Entity>> {
        self.inner.get_related(entity_type, id, relation).await
    }
}

fn repo_with_slow_primary(delay: Duration) -> UnifiedRepository {
    let manifest = EntityManifest::notes_default();
    let primary = DocumentAdapter::open_in_memory(2, manifest.backend_schema(Domain::Primary)).unwrap();
    let auxiliary = RelationalAdapter::open_in_memory(manifest.backend_schema(Domain::Auxiliary)).unwrap();
    UnifiedRepository::new(
        DomainRouter::from_manifest(&manifest).unwrap(),
        Arc::new(SlowAdapter {
            inner: Arc::new(primary),
            delay,
        }),
        Arc::new(auxiliary),
        SyncHookRegistry::new(SyncConfig::default()).unwrap(),
        RepositoryConfig::default(),
    )
}

#[tokio::test]
async fn create_then_get_by_id_round_trips_through_the_owning_backend() {
    let repo = repo();
    let outcome = repo
        .create("container", fields(json!({"name": "inbox"})), None)
        .await
        .unwrap();
    assert!(outcome.is_committed());
    assert_eq!(outcome.sync().len(), 1);
    assert_eq!(outcome.sync()[0].event_type(), SyncEventType::EntityCreated);
    let container = outcome.into_value().unwrap();
    assert!(!container.id.is_empty());

    let found = repo.get_by_id("container", &container.id, None).await.unwrap();
    assert_eq!(found.backend, BackendKind::DuckdbDocument);
    assert_eq!(found.first().unwrap(), &container);

    let state = repo
        .create("agent-state", fields(json!({"status": "pending"})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    let found = repo.get_by_id("agent-state", &state.id, None).await.unwrap();
    assert_eq!(found.backend, BackendKind::SqliteRelational);
}

#[tokio::test]
async fn created_event_carries_the_snapshot() {
    let repo = repo();
    let outcome = repo
        .create("note", fields(json!({"title": "t"})), None)
        .await
        .unwrap();
    let handle = outcome.sync()[0].handle().unwrap();
    let event = handle.event();

    assert_eq!(event.source_domain, Domain::Primary);
    assert_eq!(event.entity_type, "note");
    assert_eq!(event.sequence, 1);
    let snapshot = Entity::from_snapshot(&event.payload).unwrap();
    assert_eq!(snapshot.get_str("title"), Some("t"));
}

#[tokio::test]
async fn delete_twice_is_true_then_false_without_error() {
    let repo = repo();
    let note = repo
        .create("note", FieldMap::new(), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();

    let first = repo.delete("note", &note.id, None).await.unwrap();
    assert_eq!(first.value(), Some(&true));
    assert_eq!(first.sync().len(), 1);
    assert_eq!(first.sync()[0].event_type(), SyncEventType::EntityDeleted);

    let second = repo.delete("note", &note.id, None).await.unwrap();
    assert_eq!(second.value(), Some(&false));
    assert!(second.sync().is_empty());
}

#[tokio::test]
async fn update_of_missing_id_is_not_found() {
    let repo = repo();
    let err = repo
        .update("agent-state", "missing", fields(json!({"status": "x"})), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.is_not_found());
    assert!(matches!(
        err,
        RepositoryError::Backend {
            operation: Operation::Update,
            domain: Domain::Auxiliary,
            ..
        }
    ));
}

#[tokio::test]
async fn unregistered_type_fails_before_io() {
    let repo = repo();
    let err = repo.create("spaceship", FieldMap::new(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Routing);
    assert_eq!(repo.registry().pending(), 0);

    let err = repo.query("spaceship", &Value::Null, 10, None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Routing);
}

#[tokio::test]
async fn malformed_queries_are_validation_errors() {
    let repo = repo();
    let bad_shape = repo
        .query("note", &json!({"title": {"$regex": "x"}}), 10, None, None)
        .await
        .unwrap_err();
    assert_eq!(bad_shape.kind(), ErrorKind::Validation);

    let bad_limit = repo.query("note", &json!({}), 5000, None, None).await.unwrap_err();
    assert_eq!(bad_limit.kind(), ErrorKind::Validation);

    let bad_cursor = repo
        .query("note", &json!({}), 10, Some(&Cursor::from_token("garbage")), None)
        .await
        .unwrap_err();
    assert_eq!(bad_cursor.kind(), ErrorKind::Validation);

    let bad_relation = repo.get_related("note", "x", "siblings", None).await.unwrap_err();
    assert_eq!(bad_relation.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn id_policies_differ_per_backend() {
    let repo = repo();
    let err = repo
        .create("note", fields(json!({"id": "forced"})), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let state = repo
        .create("agent-state", fields(json!({"id": "forced"})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    assert_ne!(state.id, "forced");
}

#[tokio::test]
async fn completing_update_emits_updated_then_completed() {
    let repo = repo();
    let state = repo
        .create("agent-state", fields(json!({"status": "pending"})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();

    let plain = repo
        .update("agent-state", &state.id, fields(json!({"progress": 0.5})), None)
        .await
        .unwrap();
    assert_eq!(plain.sync().len(), 1);

    let completing = repo
        .update("agent-state", &state.id, fields(json!({"status": "completed"})), None)
        .await
        .unwrap();
    let kinds: Vec<SyncEventType> = completing.sync().iter().map(SyncDispatch::event_type).collect();
    assert_eq!(kinds, vec![SyncEventType::EntityUpdated, SyncEventType::EntityCompleted]);
    let sequences: Vec<u64> = completing
        .sync()
        .iter()
        .map(|d| d.handle().unwrap().sequence())
        .collect();
    assert_eq!(sequences, vec![3, 4]);
}

#[tokio::test]
async fn reads_never_emit() {
    let repo = repo();
    let note = repo
        .create("note", FieldMap::new(), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    repo.drain(Duration::from_secs(1)).await.unwrap();

    repo.get_by_id("note", &note.id, None).await.unwrap();
    repo.query("note", &json!({}), 10, None, None).await.unwrap();
    repo.get_related("note", &note.id, "links", None).await.unwrap();
    assert_eq!(repo.registry().pending(), 0);

    let next = repo
        .update("note", &note.id, fields(json!({"title": "x"})), None)
        .await
        .unwrap();
    assert_eq!(next.sync()[0].handle().unwrap().sequence(), 2);
}

#[tokio::test]
async fn full_sync_queue_does_not_undo_the_write() {
    let config = UnistoreConfig {
        sync: SyncConfig {
            enqueue_wait_ms: 20,
            ..SyncConfig::default()
        }
        .with_capacity(SyncEventType::EntityCreated, 1),
        ..UnistoreConfig::default()
    };
    let repo = bootstrap_without_handlers(&config).unwrap();
    repo.registry().register_fn(SyncEventType::EntityCreated, "slow", |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        anyhow::Ok(())
    });

    let first = repo.create("container", FieldMap::new(), None).await.unwrap();
    assert!(!first.backpressured());

    let second = repo.create("container", FieldMap::new(), None).await.unwrap();
    assert!(second.is_committed());
    assert!(second.backpressured());
    let container = second.into_value().unwrap();
    assert_eq!(repo.get_by_id("container", &container.id, None).await.unwrap().count, 1);

    repo.drain(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn timed_out_write_reports_unknown_outcome_and_emits_nothing() {
    let repo = repo_with_slow_primary(Duration::from_millis(500));
    let outcome = repo
        .create("note", fields(json!({"title": "maybe"})), Some(Duration::from_millis(50)))
        .await
        .unwrap();

    let warning = match outcome {
        WriteOutcome::Unknown(warning) => warning,
        WriteOutcome::Committed { .. } => panic!("expected an unknown outcome"),
    };
    assert_eq!(warning.operation, Operation::Create);
    assert_eq!(warning.domain, Domain::Primary);
    assert_eq!(warning.timeout, Duration::from_millis(50));
    assert_eq!(repo.registry().pending(), 0);

    // The slow adapter commits before stalling, so the write is in fact there.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = repo.query("note", &json!({"title": "maybe"}), 10, None, None).await.unwrap();
    assert_eq!(stored.count, 1);
}

#[tokio::test]
async fn timed_out_read_is_backend_unavailable() {
    let repo = repo_with_slow_primary(Duration::from_millis(200));
    let err = repo
        .get_by_id("note", "anything", Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert!(matches!(
        err,
        RepositoryError::Backend {
            source: StorageError::Timeout(_),
            ..
        }
    ));
}

#[tokio::test]
async fn cross_domain_relations_resolve_at_the_facade() {
    let repo = repo();
    let container = repo
        .create("container", FieldMap::new(), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    let state = repo
        .create("agent-state", fields(json!({"container_id": container.id})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();

    let companion = repo.get_related("container", &container.id, "companion", None).await.unwrap();
    assert_eq!(companion.backend, BackendKind::SqliteRelational);
    assert_eq!(companion.first().unwrap().id, state.id);

    let owner = repo.get_related("agent-state", &state.id, "container", None).await.unwrap();
    assert_eq!(owner.backend, BackendKind::DuckdbDocument);
    assert_eq!(owner.first().unwrap().id, container.id);

    let nothing = repo.get_related("agent-state", "missing", "container", None).await.unwrap();
    assert!(nothing.is_empty());
}

#[tokio::test]
async fn query_pages_through_results() {
    let repo = repo();
    for i in 0..5 {
        repo.create("note", fields(json!({"n": i, "kind": "page"})), None)
            .await
            .unwrap();
    }

    let first = repo.query("note", &json!({"kind": "page"}), 3, None, None).await.unwrap();
    assert_eq!(first.count, 3);
    let rest = repo
        .query("note", &json!({"kind": "page"}), 3, first.next_cursor.as_ref(), None)
        .await
        .unwrap();
    assert_eq!(rest.count, 2);
    assert!(rest.next_cursor.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_across_domains() {
    let repo = repo();
    let writes = (0..8).map(|i| {
        let repo = Arc::clone(&repo);
        async move {
            let entity_type = if i % 2 == 0 { "note" } else { "task-run" };
            repo.create(entity_type, fields(json!({"batch": "b", "i": i})), None)
                .await
                .unwrap()
                .into_value()
                .unwrap()
        }
    });
    let created = futures::future::join_all(writes).await;
    assert_eq!(created.len(), 8);

    let notes = repo.query("note", &json!({"batch": "b"}), 100, None, None).await.unwrap();
    let runs = repo.query("task-run", &json!({"batch": "b"}), 100, None, None).await.unwrap();
    assert_eq!((notes.count, runs.count), (4, 4));
    repo.drain(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn reverse_relations_match_array_links_in_every_placement() {
    let repo = repo();
    let container = repo
        .create("container", FieldMap::new(), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    let shared = repo
        .create("agent-state", fields(json!({"container_id": ["elsewhere", container.id]})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    repo.create("agent-state", fields(json!({"container_id": ["elsewhere"]})), None)
        .await
        .unwrap();
    let run = repo
        .create("task-run", fields(json!({"agent_state_id": [shared.id]})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    let target = repo
        .create("note", FieldMap::new(), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();
    let linking = repo
        .create("note", fields(json!({"links": [target.id]})), None)
        .await
        .unwrap()
        .into_value()
        .unwrap();

    let across = repo.get_related("container", &container.id, "companion", None).await.unwrap();
    let auxiliary = repo.get_related("agent-state", &shared.id, "runs", None).await.unwrap();
    let primary = repo.get_related("note", &target.id, "backlinks", None).await.unwrap();

    assert_eq!(across.items.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec![shared.id.as_str()]);
    assert_eq!(auxiliary.first().unwrap().id, run.id);
    assert_eq!(primary.first().unwrap().id, linking.id);
    assert_eq!((across.count, auxiliary.count, primary.count), (1, 1, 1));
}
