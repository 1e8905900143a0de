//! SQLite-backed relational/time-series store for the auxiliary domain.
//!
//! Current state lives in `records`; every create, update and delete also
//! appends a row to `record_history`, which is never rewritten. Filters and
//! relations compile to parameterised SQL over the JSON `fields` column.
//!
//! Ids are minted here. An `id` key in write data is dropped.

use crate::adapter::{BackendAdapter, apply_id_policy, ensure_served, now_millis};
use crate::error::{StorageError, StorageResult};
use crate::pool::ConnectionPool;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use unistore_model::{
    BackendKind, BackendSchema, Condition, Cursor, Entity, FieldMap, FilterOp, Filters, IdPolicy,
    QueryResult, RelationKind, validate_limit,
};
use unistore_types::EntityId;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        fields TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_records_type ON records(entity_type, id);

    CREATE TABLE IF NOT EXISTS record_history (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        record_id TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        change TEXT NOT NULL,
        fields TEXT NOT NULL,
        recorded_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_history_record ON record_history(record_id, seq);
";

const RECORD_COLUMNS: &str = "r.id, r.entity_type, r.fields, r.created_at, r.updated_at";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of change captured in a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }

    fn parse(s: &str) -> StorageResult<Self> {
        match s {
            "created" => Ok(ChangeKind::Created),
            "updated" => Ok(ChangeKind::Updated),
            "deleted" => Ok(ChangeKind::Deleted),
            other => Err(StorageError::Migration(format!("unknown history change {other:?}"))),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a record's time-series. `fields` is the full state after the
/// change; for deletions it is the last state before removal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub seq: i64,
    pub record_id: String,
    pub change: ChangeKind,
    pub fields: FieldMap,
    pub recorded_at: i64,
}

/// The auxiliary-domain adapter.
pub struct RelationalAdapter {
    pool: Arc<ConnectionPool<Connection>>,
    schema: Arc<BackendSchema>,
}

impl RelationalAdapter {
    /// Opens (or creates) a relational store at `path` with `pool_size` connections.
    pub fn open(path: &Path, pool_size: usize, schema: BackendSchema) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut connections = Vec::with_capacity(pool_size.max(1));
        for i in 0..pool_size.max(1) {
            let conn = Connection::open(path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            if i == 0 {
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                debug!(journal_mode = %mode, "relational store journal mode");
                migrate(&conn)?;
            }
            connections.push(conn);
        }
        info!(path = %path.display(), pool_size = connections.len(), "opened relational store");

        Ok(Self {
            pool: ConnectionPool::new("relational", connections)?,
            schema: Arc::new(schema),
        })
    }

    /// Opens an in-memory store. SQLite memory databases are private to
    /// their connection, so the pool always has exactly one.
    pub fn open_in_memory(schema: BackendSchema) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            pool: ConnectionPool::new("relational", vec![conn])?,
            schema: Arc::new(schema),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// The append-only change log of one record, oldest first.
    pub async fn history(&self, entity_type: &str, id: &str) -> StorageResult<Vec<HistoryEntry>> {
        ensure_served(&self.schema, self.kind(), entity_type)?;

        let (entity_type, id) = (entity_type.to_string(), id.to_string());
        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, record_id, change, fields, recorded_at FROM record_history \
                     WHERE record_id = ? AND entity_type = ? ORDER BY seq",
                )?;
                let rows = stmt.query_map(params![id, entity_type], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    let (seq, record_id, change, fields, recorded_at) = row?;
                    entries.push(HistoryEntry {
                        seq,
                        record_id,
                        change: ChangeKind::parse(&change)?,
                        fields: serde_json::from_str(&fields)?,
                        recorded_at,
                    });
                }
                Ok(entries)
            })
            .await
    }
}

fn migrate(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| StorageError::Migration(format!("relational schema: {e}")))
}

type RawRecord = (String, String, String, i64, i64);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(raw: RawRecord) -> StorageResult<Entity> {
    let (id, entity_type, fields, created_at, modified_at) = raw;
    Ok(Entity {
        id,
        entity_type,
        fields: serde_json::from_str(&fields)?,
        created_at,
        modified_at,
    })
}

fn select_entities(conn: &Connection, sql: &str, args: Vec<SqlValue>) -> StorageResult<Vec<Entity>> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params_from_iter(args.iter()), read_raw)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(decode).collect()
}

fn load_record(conn: &Connection, entity_type: &str, id: &str) -> StorageResult<Option<Entity>> {
    let raw = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ? AND r.entity_type = ?"),
            params![id, entity_type],
            read_raw,
        )
        .optional()?;
    raw.map(decode).transpose()
}

fn append_history(conn: &Connection, entity: &Entity, change: ChangeKind, at: i64) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO record_history (record_id, entity_type, change, fields, recorded_at) \
         VALUES (?, ?, ?, ?, ?)",
        params![
            entity.id,
            entity.entity_type,
            change.as_str(),
            serde_json::to_string(&entity.fields)?,
            at
        ],
    )?;
    Ok(())
}

fn json_path(field: &str) -> SqlValue {
    SqlValue::Text(format!("$.\"{field}\""))
}

fn scalar_param(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Typed equality on one field. Never evaluates to SQL NULL, so it can be
/// negated for `$ne`.
fn equality_sql(cond: &Condition, args: &mut Vec<SqlValue>) -> String {
    let path = json_path(&cond.field);
    match &cond.value {
        Value::Null => {
            args.push(path);
            "json_extract(fields, ?) IS NULL".to_string()
        }
        Value::Bool(b) => {
            args.push(path);
            format!("json_type(fields, ?) IS '{b}'")
        }
        Value::Number(_) => {
            args.extend([path.clone(), path, scalar_param(&cond.value)]);
            "(COALESCE(json_type(fields, ?), '') IN ('integer', 'real') AND json_extract(fields, ?) IS ?)"
                .to_string()
        }
        _ => {
            args.extend([path.clone(), path, scalar_param(&cond.value)]);
            "(json_type(fields, ?) IS 'text' AND json_extract(fields, ?) IS ?)".to_string()
        }
    }
}

/// Compiles one condition into a predicate over the `fields` column.
/// Range bounds only ever match values of the same JSON kind.
fn condition_sql(cond: &Condition, args: &mut Vec<SqlValue>) -> String {
    match cond.op {
        FilterOp::Eq => equality_sql(cond, args),
        FilterOp::Ne => format!("NOT {}", equality_sql(cond, args)),
        op => {
            let path = json_path(&cond.field);
            let kind_guard = if cond.value.is_number() {
                "COALESCE(json_type(fields, ?), '') IN ('integer', 'real')"
            } else {
                "json_type(fields, ?) IS 'text'"
            };
            args.extend([path.clone(), path, scalar_param(&cond.value)]);
            format!("({kind_guard} AND json_extract(fields, ?) {} ?)", op.sql())
        }
    }
}

#[async_trait]
impl BackendAdapter for RelationalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::SqliteRelational
    }

    fn id_policy(&self) -> IdPolicy {
        IdPolicy::Ignore
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

        let mut args = vec![SqlValue::Text(entity_type.to_string())];
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.entity_type = ?");
        if let Some(cursor) = cursor {
            sql.push_str(" AND r.id > ?");
            args.push(SqlValue::Text(cursor.last_id()?));
        }
        for cond in filters.conditions() {
            sql.push_str(" AND ");
            sql.push_str(&condition_sql(cond, &mut args));
        }
        sql.push_str(" ORDER BY r.id LIMIT ?");
        args.push(SqlValue::Integer(limit as i64 + 1));

        let mut items = self
            .pool
            .run(move |conn| select_entities(conn, &sql, args))
            .await?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
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
            .run(move |conn| load_record(conn, &entity_type, &id))
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

        let stored = entity.clone();
        self.pool
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO records (id, entity_type, fields, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                    params![
                        stored.id,
                        stored.entity_type,
                        serde_json::to_string(&stored.fields)?,
                        stored.created_at,
                        stored.modified_at
                    ],
                )?;
                append_history(&tx, &stored, ChangeKind::Created, stored.created_at)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(entity_type, id = %entity.id, "record created");
        Ok(entity)
    }

    async fn update(&self, entity_type: &str, id: &str, data: FieldMap) -> StorageResult<Entity> {
        ensure_served(&self.schema, self.kind(), entity_type)?;
        let patch = apply_id_policy(self.id_policy(), self.kind(), data)?;

        let (entity_type, id) = (entity_type.to_string(), id.to_string());
        let updated = self
            .pool
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut entity = load_record(&tx, &entity_type, &id)?
                    .ok_or_else(|| StorageError::not_found(&entity_type, &id))?;
                entity.apply_patch(patch, now_millis().max(entity.modified_at));

                tx.execute(
                    "UPDATE records SET fields = ?, updated_at = ? WHERE id = ?",
                    params![serde_json::to_string(&entity.fields)?, entity.modified_at, entity.id],
                )?;
                append_history(&tx, &entity, ChangeKind::Updated, entity.modified_at)?;
                tx.commit()?;
                Ok(entity)
            })
            .await?;

        debug!(entity_type = %updated.entity_type, id = %updated.id, "record updated");
        Ok(updated)
    }

    async fn delete(&self, entity_type: &str, id: &str) -> StorageResult<bool> {
        ensure_served(&self.schema, self.kind(), entity_type)?;

        let (entity_type, id) = (entity_type.to_string(), id.to_string());
        self.pool
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let Some(entity) = load_record(&tx, &entity_type, &id)? else {
                    return Ok(false);
                };
                tx.execute("DELETE FROM records WHERE id = ?", params![entity.id])?;
                append_history(&tx, &entity, ChangeKind::Deleted, now_millis())?;
                tx.commit()?;
                Ok(true)
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

        let (sql, args) = match &def.kind {
            RelationKind::Forward { field } => (
                format!(
                    "SELECT DISTINCT {RECORD_COLUMNS} FROM records s, json_each(s.fields, ?) j \
                     JOIN records r ON r.id = j.value \
                     WHERE s.id = ? AND s.entity_type = ? AND r.entity_type = ? ORDER BY r.id"
                ),
                vec![
                    json_path(field),
                    SqlValue::Text(id.to_string()),
                    SqlValue::Text(entity_type.to_string()),
                    SqlValue::Text(def.target_type.clone()),
                ],
            ),
            RelationKind::Reverse { field } => (
                format!(
                    "SELECT {RECORD_COLUMNS} FROM records r \
                     WHERE r.entity_type = ? \
                     AND EXISTS (SELECT 1 FROM json_each(r.fields, ?) j WHERE j.value = ?) \
                     ORDER BY r.id"
                ),
                vec![
                    SqlValue::Text(def.target_type.clone()),
                    json_path(field),
                    SqlValue::Text(id.to_string()),
                ],
            ),
        };

        let items = self
            .pool
            .run(move |conn| select_entities(conn, &sql, args))
            .await?;
        Ok(QueryResult::new(items, self.kind(), started, None))
    }
}
