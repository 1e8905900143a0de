//! Core type definitions for the unified data access layer.
//!
//! This crate defines the backend-agnostic types every other crate depends on:
//! - [`Domain`]: the two ownership groups an entity type can belong to
//! - Entity and event identifiers (UUID v7)
//! - [`Timestamp`]: millisecond wall-clock timestamps
//! - [`SyncEvent`]: the immutable record of a completed mutation

mod domain;
mod event;
mod ids;
mod timestamp;

pub use domain::Domain;
pub use event::{SyncEvent, SyncEventType};
pub use ids::{EntityId, EventId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}
