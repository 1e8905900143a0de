//! Storage backends for the unified data access layer.
//!
//! Two adapters implement the same [`BackendAdapter`] capability set:
//!
//! - [`DocumentAdapter`] stores primary-domain entities as JSON documents in
//!   DuckDB, with an edge table for relation traversal.
//! - [`RelationalAdapter`] stores auxiliary-domain records in SQLite, with an
//!   append-only history table.
//!
//! Both drivers are blocking; every call runs on a pooled connection inside
//! `spawn_blocking`.

mod adapter;
mod document;
mod error;
mod pool;
mod relational;

pub use adapter::BackendAdapter;
pub use document::{DocumentAdapter, open_duckdb_with_wal_recovery};
pub use error::{StorageError, StorageResult};
pub use pool::ConnectionPool;
pub use relational::{ChangeKind, HistoryEntry, RelationalAdapter};
