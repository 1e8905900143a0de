//! DuckDB-backed graph/document store for the primary domain.
//!
//! # Layout
//!
//! - `entities` holds one JSON document per entity.
//! - `entity_links` is an edge index rebuilt on every write from the
//!   entity's link fields (see [`BackendSchema::link_fields`]). Relations are
//!   resolved by walking edges, in either direction, never by scanning
//!   documents.
//!
//! Filters are evaluated against decoded documents while scanning the
//! entity type in id order.
//!
//! Ids are minted here. An `id` key in write data is rejected.

use crate::adapter::{BackendAdapter, apply_id_policy, ensure_served, now_millis};
use crate::error::{StorageError, StorageResult};
use crate::pool::ConnectionPool;
use async_trait::async_trait;
use duckdb::{Connection, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use unistore_model::{
    BackendKind, BackendSchema, Cursor, Entity, FieldMap, Filters, IdPolicy, QueryResult, RelationKind,
    validate_limit,
};
use unistore_types::EntityId;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entities (
        id VARCHAR PRIMARY KEY,
        entity_type VARCHAR NOT NULL,
        data VARCHAR NOT NULL,
        created_at BIGINT NOT NULL,
        modified_at BIGINT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

    CREATE TABLE IF NOT EXISTS entity_links (
        source_id VARCHAR NOT NULL,
        source_type VARCHAR NOT NULL,
        field VARCHAR NOT NULL,
        target_id VARCHAR NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_links_source ON entity_links(source_id, field);
    CREATE INDEX IF NOT EXISTS idx_links_target ON entity_links(target_id, field);
";

const ENTITY_COLUMNS: &str = "e.id, e.entity_type, e.data, e.created_at, e.modified_at";

/// Open a DuckDB connection with stale WAL recovery.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. This handles the common case
/// where an unclean shutdown leaves a WAL file that prevents reopening.
pub fn open_duckdb_with_wal_recovery(path: &Path) -> StorageResult<Connection> {
    match Connection::open(path) {
        Ok(conn) => Ok(conn),
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    wal = %wal_path.display(),
                    "DuckDB open failed, removing stale WAL and retrying"
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    return Connection::open(path).map_err(Into::into);
                }
            }
            Err(first_err.into())
        }
    }
}

/// The primary-domain adapter.
pub struct DocumentAdapter {
    pool: Arc<ConnectionPool<Connection>>,
    schema: Arc<BackendSchema>,
}

impl DocumentAdapter {
    /// Opens (or creates) a document store at `path` with `pool_size` connections.
    pub fn open(path: &Path, pool_size: usize, schema: BackendSchema) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_duckdb_with_wal_recovery(path)?;
        info!(path = %path.display(), pool_size, "opened document store");
        Self::from_connection(conn, pool_size, schema)
    }

    /// Opens an in-memory store. Pool connections share one database.
    pub fn open_in_memory(pool_size: usize, schema: BackendSchema) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, pool_size, schema)
    }

    fn from_connection(conn: Connection, pool_size: usize, schema: BackendSchema) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::Migration(format!("document schema: {e}")))?;

        let mut connections = Vec::with_capacity(pool_size.max(1));
        for _ in 1..pool_size.max(1) {
            connections.push(conn.try_clone()?);
        }
        connections.push(conn);

        Ok(Self {
            pool: ConnectionPool::new("document", connections)?,
            schema: Arc::new(schema),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Number of stored edges leaving `source_id`; exposed for diagnostics.
    pub async fn link_count(&self, source_id: &str) -> StorageResult<usize> {
        let source_id = source_id.to_string();
        self.pool
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entity_links WHERE source_id = ?",
                    params![source_id],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }
}

fn decode_row(row: &duckdb::Row<'_>) -> StorageResult<Entity> {
    let data: String = row.get(2)?;
    let fields: FieldMap = serde_json::from_str(&data)?;
    Ok(Entity {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        fields,
        created_at: row.get(3)?,
        modified_at: row.get(4)?,
    })
}

fn load_entity(conn: &Connection, entity_type: &str, id: &str) -> StorageResult<Option<Entity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.id = ? AND e.entity_type = ?"
    ))?;
    let mut rows = stmt.query(params![id, entity_type])?;
    match rows.next()? {
        Some(row) => Ok(Some(decode_row(row)?)),
        None => Ok(None),
    }
}

fn load_many(conn: &Connection, sql: &str, args: [&str; 3]) -> StorageResult<Vec<Entity>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![args[0], args[1], args[2]])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode_row(row)?);
    }
    Ok(out)
}

/// Rewrites the edges leaving `entity` from its current link fields.
fn reindex_links(conn: &Connection, entity: &Entity, link_fields: &BTreeSet<String>) -> StorageResult<()> {
    conn.execute("DELETE FROM entity_links WHERE source_id = ?", params![entity.id])?;
    for field in link_fields {
        let targets: BTreeSet<String> = entity.linked_ids(field).into_iter().collect();
        for target in targets {
            conn.execute(
                "INSERT INTO entity_links (source_id, source_type, field, target_id) VALUES (?, ?, ?, ?)",
                params![entity.id, entity.entity_type, field, target],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl BackendAdapter for DocumentAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckdbDocument
    }

    fn id_policy(&self) -> IdPolicy {
        IdPolicy::Reject
    }

    fn schema(&self) -> &BackendSchema {
        &self.schema
    }

    async fn query(
        &self,
        entity_type: &str,
        filters: &Filters,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> StorageResult<QueryResult<Entity>> {
        let started = Instant::now();
        ensure_served(&self.schema, self.kind(), entity_type)?;
        validate_limit(limit)?;
        let after = match cursor {
            Some(c) => c.last_id()?,
            None => String::new(),
        };

        let entity_type = entity_type.to_string();
        let filters = filters.clone();
        let (items, has_more) = self
            .pool
            .run(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities e \
                     WHERE e.entity_type = ? AND e.id > ? ORDER BY e.id"
                ))?;
                let mut rows = stmt.query(params![entity_type, after])?;
                let mut matched = Vec::with_capacity(limit);
                while let Some(row) = rows.next()? {
                    let entity = decode_row(row)?;
                    if filters.matches(&entity.fields) {
                        if matched.len() == limit {
                            return Ok((matched, true));
                        }
                        matched.push(entity);
                    }
                }
                Ok((matched, false))
            })
            .await?;

        let next_cursor = if has_more {
            items.last().map(|e| Cursor::after(&e.id))
        } else {
            None
        };
        Ok(QueryResult::new(items, self.kind(), started, next_cursor))
    }

    async fn get_by_id(&self, entity_type: &str, id: &str) -> StorageResult<QueryResult<Entity>> {
        let started = Instant::now();
        ensure_served(&self.schema, self.kind(), entity_type)?;

        let (entity_type, id) = (entity_type.to_string(), id.to_string());
        let found = self
            .pool
            .run(move |conn| load_entity(conn, &entity_type, &id))
            .await?;
        Ok(QueryResult::new(found.into_iter().collect(), self.kind(), started, None))
    }

    async fn create(&self, entity_type: &str, data: FieldMap) -> StorageResult<Entity> {
        ensure_served(&self.schema, self.kind(), entity_type)?;
        let fields = apply_id_policy(self.id_policy(), self.kind(), data)?;

        let now = now_millis();
        let entity = Entity {
            id: EntityId::new().to_string(),
            entity_type: entity_type.to_string(),
            fields,
            created_at: now,
            modified_at: now,
        };
        let link_fields = self.schema.link_fields(entity_type);

        let stored = entity.clone();
        self.pool
            .run(move |conn| {
                let data = serde_json::to_string(&stored.fields)?;
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO entities (id, entity_type, data, created_at, modified_at) VALUES (?, ?, ?, ?, ?)",
                    params![stored.id, stored.entity_type, data, stored.created_at, stored.modified_at],
                )?;
                reindex_links(&tx, &stored, &link_fields)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(entity_type, id = %entity.id, "document created");
        Ok(entity)
    }

    async fn update(&self, entity_type: &str, id: &str, data: FieldMap) -> StorageResult<Entity> {
        ensure_served(&self.schema, self.kind(), entity_type)?;
        let patch = apply_id_policy(self.id_policy(), self.kind(), data)?;
        let link_fields = self.schema.link_fields(entity_type);

        let (entity_type, id) = (entity_type.to_string(), id.to_string());
        let updated = self
            .pool
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut entity = load_entity(&tx, &entity_type, &id)?
                    .ok_or_else(|| StorageError::not_found(&entity_type, &id))?;
                entity.apply_patch(patch, now_millis().max(entity.modified_at));

                let data = serde_json::to_string(&entity.fields)?;
                tx.execute(
                    "UPDATE entities SET data = ?, modified_at = ? WHERE id = ?",
                    params![data, entity.modified_at, entity.id],
                )?;
                reindex_links(&tx, &entity, &link_fields)?;
                tx.commit()?;
                Ok(entity)
            })
            .await?;

        debug!(entity_type = %updated.entity_type, id = %updated.id, "document updated");
        Ok(updated)
    }

    async fn delete(&self, entity_type: &str, id: &str) -> StorageResult<bool> {
        ensure_served(&self.schema, self.kind(), entity_type)?;

        let (entity_type, id) = (entity_type.to_string(), id.to_string());
        self.pool
            .run(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute(
                    "DELETE FROM entities WHERE id = ? AND entity_type = ?",
                    params![id, entity_type],
                )?;
                if removed > 0 {
                    tx.execute("DELETE FROM entity_links WHERE source_id = ?", params![id])?;
                }
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
    }

    async fn get_related(
        &self,
        entity_type: &str,
        id: &str,
        relation: &str,
    ) -> StorageResult<QueryResult<Entity>> {
        let started = Instant::now();
        ensure_served(&self.schema, self.kind(), entity_type)?;
        let def = self.schema.relation(entity_type, relation).cloned().ok_or_else(|| {
            StorageError::Validation(format!("unknown relation {relation:?} on {entity_type:?}"))
        })?;

        let id = id.to_string();
        let items = self
            .pool
            .run(move |conn| match &def.kind {
                RelationKind::Forward { field } => load_many(
                    conn,
                    &format!(
                        "SELECT DISTINCT {ENTITY_COLUMNS} FROM entity_links l \
                         JOIN entities e ON e.id = l.target_id \
                         WHERE l.source_id = ? AND l.field = ? AND e.entity_type = ? ORDER BY e.id"
                    ),
                    [&id, field, &def.target_type],
                ),
                RelationKind::Reverse { field } => load_many(
                    conn,
                    &format!(
                        "SELECT DISTINCT {ENTITY_COLUMNS} FROM entity_links l \
                         JOIN entities e ON e.id = l.source_id \
                         WHERE l.target_id = ? AND l.field = ? AND l.source_type = ? ORDER BY e.id"
                    ),
                    [&id, field, &def.target_type],
                ),
            })
            .await?;

        Ok(QueryResult::new(items, self.kind(), started, None))
    }
}
