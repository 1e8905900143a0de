//! Results of mutations.
//!
//! A write either committed (and the emitted sync events are reported
//! alongside the value) or its outcome is unknown because the caller's
//! timeout expired while the backend was still working.

use crate::error::Operation;
use std::fmt;
use std::time::Duration;
use unistore_sync::{EmitHandle, SyncError};
use unistore_types::{Domain, SyncEventType};

/// What happened to one sync event after a committed write.
#[derive(Debug)]
pub enum SyncDispatch {
    /// Queued for delivery.
    Emitted(EmitHandle),
    /// Not queued; the write itself is still committed.
    Rejected {
        event_type: SyncEventType,
        error: SyncError,
    },
}

impl SyncDispatch {
    pub fn event_type(&self) -> SyncEventType {
        match self {
            SyncDispatch::Emitted(handle) => handle.event_type(),
            SyncDispatch::Rejected { event_type, .. } => *event_type,
        }
    }

    pub fn handle(&self) -> Option<&EmitHandle> {
        match self {
            SyncDispatch::Emitted(handle) => Some(handle),
            SyncDispatch::Rejected { .. } => None,
        }
    }

    pub fn into_handle(self) -> Option<EmitHandle> {
        match self {
            SyncDispatch::Emitted(handle) => Some(handle),
            SyncDispatch::Rejected { .. } => None,
        }
    }

    pub fn is_backpressure(&self) -> bool {
        matches!(self, SyncDispatch::Rejected { error, .. } if error.is_backpressure())
    }
}

/// A write timed out: the backend may or may not have committed it, and no
/// sync event was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCommitWarning {
    pub entity_type: String,
    pub operation: Operation,
    pub domain: Domain,
    pub timeout: Duration,
}

impl fmt::Display for PartialCommitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({}) exceeded {:?}; the write may or may not have been applied",
            self.operation, self.entity_type, self.domain, self.timeout
        )
    }
}

impl std::error::Error for PartialCommitWarning {}

/// Result of a mutation that did not fail outright.
#[derive(Debug)]
pub enum WriteOutcome<T> {
    Committed { value: T, sync: Vec<SyncDispatch> },
    Unknown(PartialCommitWarning),
}

impl<T> WriteOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            WriteOutcome::Committed { value, .. } => Some(value),
            WriteOutcome::Unknown(_) => None,
        }
    }

    pub fn into_value(self) -> Result<T, PartialCommitWarning> {
        match self {
            WriteOutcome::Committed { value, .. } => Ok(value),
            WriteOutcome::Unknown(warning) => Err(warning),
        }
    }

    /// Sync dispatches for a committed write; empty otherwise.
    pub fn sync(&self) -> &[SyncDispatch] {
        match self {
            WriteOutcome::Committed { sync, .. } => sync,
            WriteOutcome::Unknown(_) => &[],
        }
    }

    pub fn into_parts(self) -> Result<(T, Vec<SyncDispatch>), PartialCommitWarning> {
        match self {
            WriteOutcome::Committed { value, sync } => Ok((value, sync)),
            WriteOutcome::Unknown(warning) => Err(warning),
        }
    }

    /// True if any event was refused because its queue was full.
    pub fn backpressured(&self) -> bool {
        self.sync().iter().any(SyncDispatch::is_backpressure)
    }

    pub fn warning(&self) -> Option<&PartialCommitWarning> {
        match self {
            WriteOutcome::Unknown(warning) => Some(warning),
            WriteOutcome::Committed { .. } => None,
        }
    }
}
