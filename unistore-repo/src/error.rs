//! Error types for the repository facade.

use crate::router::RoutingError;
use std::fmt;
use thiserror::Error;
use unistore_model::FilterError;
use unistore_storage::StorageError;
use unistore_types::Domain;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// The facade operations, as recorded in errors and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    GetById,
    GetRelated,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::GetById => "get_by_id",
            Operation::GetRelated => "get_related",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub const fn is_write(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update | Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a facade error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Routing,
    Validation,
    NotFound,
    BackendUnavailable,
}

/// Errors surfaced by [`UnifiedRepository`](crate::UnifiedRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Rejected at the facade before reaching a backend.
    #[error("invalid request: {0}")]
    Validation(#[from] FilterError),

    /// The relation is not on the entity type's allow-list.
    #[error("unknown relation {relation:?} on {entity_type:?}")]
    UnknownRelation { entity_type: String, relation: String },

    /// A backend failed the operation.
    #[error("{operation} on {entity_type} ({domain}) failed: {source}")]
    Backend {
        entity_type: String,
        operation: Operation,
        domain: Domain,
        #[source]
        source: StorageError,
    },

    /// A store could not be opened.
    #[error("failed to open {domain} store: {source}")]
    Open {
        domain: Domain,
        #[source]
        source: StorageError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl RepositoryError {
    pub(crate) fn backend(entity_type: &str, operation: Operation, domain: Domain, source: StorageError) -> Self {
        RepositoryError::Backend {
            entity_type: entity_type.to_string(),
            operation,
            domain,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::Routing(_) => ErrorKind::Routing,
            RepositoryError::Validation(_)
            | RepositoryError::UnknownRelation { .. }
            | RepositoryError::Config(_) => ErrorKind::Validation,
            RepositoryError::Backend { source, .. } if source.is_not_found() => ErrorKind::NotFound,
            RepositoryError::Backend { source, .. } if source.is_validation() => ErrorKind::Validation,
            RepositoryError::Backend { .. } | RepositoryError::Open { .. } => ErrorKind::BackendUnavailable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
