use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use unistore_model::{EntityManifest, FieldMap};
use unistore_repo::{ConfigError, ErrorKind, UnistoreConfig, bootstrap, bootstrap_without_handlers};
use unistore_sync::SyncEventType;
use unistore_types::Domain;

#[test]
fn empty_document_is_the_default_config() {
    let config = UnistoreConfig::from_toml_str("").unwrap();
    assert_eq!(config, UnistoreConfig::default());
    assert_eq!(config.document.pool_size, 4);
    assert_eq!(config.relational.pool_size, 2);
    assert!(config.document.path.is_none());
    assert_eq!(config.repository.default_timeout(), Duration::from_secs(5));
    assert_eq!(config.manifest, EntityManifest::notes_default());
}

#[test]
fn sections_override_defaults() {
    let config = UnistoreConfig::from_toml_str(
        r#"
        [document]
        path = "data/primary.duckdb"
        pool_size = 8

        [sync]
        enqueue_wait_ms = 10
        [sync.queue_capacity]
        entity_created = 16

        [repository]
        default_timeout_ms = 750
        completion_field = "state"
        completion_value = "done"

        [companion]
        source_type = "board"
        companion_type = "board-state"
        link_field = "board_id"
        relation = "state"
        companion_field = "state_id"

        [[manifest.entities]]
        name = "board"
        domain = "primary"
        [[manifest.entities.relations]]
        name = "state"
        target_type = "board-state"
        kind = "reverse"
        field = "board_id"

        [[manifest.entities]]
        name = "board-state"
        domain = "auxiliary"
        "#,
    )
    .unwrap();

    assert_eq!(config.document.path.as_deref(), Some(std::path::Path::new("data/primary.duckdb")));
    assert_eq!(config.document.pool_size, 8);
    assert_eq!(config.relational.pool_size, 2);
    assert_eq!(config.sync.capacity_for(SyncEventType::EntityCreated), 16);
    assert_eq!(config.sync.capacity_for(SyncEventType::EntityDeleted), 256);
    assert_eq!(config.repository.default_timeout(), Duration::from_millis(750));
    assert_eq!(config.repository.completion_value, json!("done"));
    assert_eq!(config.companion.companion_type, "board-state");
    assert_eq!(config.manifest.entities.len(), 2);
    assert_eq!(config.manifest.registration("board-state").unwrap().domain, Domain::Auxiliary);
}

#[test]
fn invalid_values_are_rejected() {
    for text in [
        "[document]\npool_size = 0",
        "[repository]\ndefault_timeout_ms = 0",
        "[sync]\ndefault_queue_capacity = 0",
        "[manifest]\nentities = []",
    ] {
        let err = UnistoreConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{text}: {err}");
    }

    let err = UnistoreConfig::from_toml_str("[document]\npool_size = \"four\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn load_reads_a_file_and_reports_missing_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unistore.toml");
    std::fs::write(&path, "[relational]\npool_size = 3\n").unwrap();

    let config = UnistoreConfig::load(&path).unwrap();
    assert_eq!(config.relational.pool_size, 3);

    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        UnistoreConfig::load(&missing).unwrap_err(),
        ConfigError::Io { .. }
    ));
}

#[tokio::test]
async fn file_backed_stores_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = UnistoreConfig::default();
    config.document.path = Some(dir.path().join("primary.duckdb"));
    config.relational.path = Some(dir.path().join("auxiliary.sqlite"));

    let id = {
        let repo = bootstrap(&config).unwrap();
        let mut data = FieldMap::new();
        data.insert("name".into(), json!("persisted"));
        let created = repo
            .create("container", data, None)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        repo.drain(Duration::from_secs(5)).await.unwrap();
        repo.registry().close();
        created.id
    };

    let repo = bootstrap_without_handlers(&config).unwrap();
    let container = repo.get_by_id("container", &id, None).await.unwrap().into_first().unwrap();
    assert_eq!(container.get_str("name"), Some("persisted"));
    let companion = repo.get_related("container", &id, "companion", None).await.unwrap();
    assert_eq!(companion.count, 1);
}

#[test]
fn companion_rule_must_match_a_declared_relation() {
    let mut config = UnistoreConfig::default();
    config.companion.relation = "notes".into();
    let err = bootstrap(&config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // Without handlers the rule is never consulted.
    assert!(bootstrap_without_handlers(&config).is_ok());
}
