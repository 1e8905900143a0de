//! Error types for the storage layer.

use std::time::Duration;
use thiserror::Error;
use unistore_model::FilterError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in adapter operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from DuckDB.
    #[error("document store error: {0}")]
    Database(#[from] duckdb::Error),

    /// Database error from SQLite.
    #[error("relational store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed filters, cursor, or limit.
    #[error("invalid query: {0}")]
    Filter(#[from] FilterError),

    /// Malformed write data, unknown relation, or an entity type this
    /// backend does not serve.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entity not found.
    #[error("entity not found: {entity_type}/{id}")]
    NotFound { entity_type: String, id: String },

    /// Connection pool exhausted or closed.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// The operation did not finish within the caller's timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("storage task failed: {0}")]
    TaskFailed(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl StorageError {
    pub fn not_found(entity_type: &str, id: &str) -> Self {
        StorageError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Rejected before any I/O was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Filter(_) | StorageError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Connectivity, driver, or timeout failure talking to a physical store.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::Database(_)
                | StorageError::Sqlite(_)
                | StorageError::Pool(_)
                | StorageError::Timeout(_)
                | StorageError::TaskFailed(_)
                | StorageError::Io(_)
                | StorageError::Migration(_)
        )
    }
}
