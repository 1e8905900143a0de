//! Error types for the sync layer.

use crate::DeadLetterId;
use std::time::Duration;
use thiserror::Error;
use unistore_types::SyncEventType;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while emitting or draining events.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The bounded queue for this event type stayed full for the whole
    /// enqueue wait.
    #[error("sync queue for {event_type} is full (capacity {capacity}, waited {waited:?})")]
    Backpressure {
        event_type: SyncEventType,
        capacity: usize,
        waited: Duration,
    },

    /// Events were still pending when the drain deadline passed.
    #[error("drain timed out with {pending} event(s) pending")]
    DrainTimeout { pending: usize },

    /// The registry no longer accepts events.
    #[error("sync registry is closed")]
    Closed,

    /// No dead letter with this id.
    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(DeadLetterId),

    /// The delivery worker went away before reporting.
    #[error("delivery report dropped")]
    ReportDropped,

    /// Configuration rejected at construction.
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    pub fn is_backpressure(&self) -> bool {
        matches!(self, SyncError::Backpressure { .. })
    }
}
