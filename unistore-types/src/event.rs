//! Sync events describing completed mutations.
//!
//! A [`SyncEvent`] is constructed by the repository facade after a mutation
//! has been committed by its backend. It is handed to the sync hook registry,
//! delivered to every handler subscribed to its [`SyncEventType`], and then
//! discarded. Events are immutable once stamped with their per-entity
//! sequence number.

use crate::{Domain, EventId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    /// An entity was created.
    EntityCreated,
    /// An entity was partially updated.
    EntityUpdated,
    /// An entity was removed.
    EntityDeleted,
    /// An update moved an entity into its completed state.
    EntityCompleted,
}

impl SyncEventType {
    pub const ALL: [SyncEventType; 4] = [
        SyncEventType::EntityCreated,
        SyncEventType::EntityUpdated,
        SyncEventType::EntityDeleted,
        SyncEventType::EntityCompleted,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncEventType::EntityCreated => "entity_created",
            SyncEventType::EntityUpdated => "entity_updated",
            SyncEventType::EntityDeleted => "entity_deleted",
            SyncEventType::EntityCompleted => "entity_completed",
        }
    }
}

impl fmt::Display for SyncEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncEventType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownEventType(s.to_string()))
    }
}

/// An immutable record of a completed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    pub event_type: SyncEventType,

    /// Domain of the store that performed the mutation.
    pub source_domain: Domain,

    pub entity_type: String,

    pub entity_id: String,

    /// When the event was constructed.
    pub timestamp: Timestamp,

    /// Opaque payload; for entity mutations this is the entity snapshot.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Position of this event among all events for `entity_id`, starting at 1.
    /// Zero until the registry stamps it at enqueue time.
    #[serde(default)]
    pub sequence: u64,
}

impl SyncEvent {
    /// Creates a new, unstamped event.
    #[must_use]
    pub fn new(
        event_type: SyncEventType,
        source_domain: Domain,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            source_domain,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            timestamp: Timestamp::now(),
            payload,
            sequence: 0,
        }
    }

    #[must_use]
    pub fn entity_created(
        source_domain: Domain,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        snapshot: serde_json::Value,
    ) -> Self {
        Self::new(SyncEventType::EntityCreated, source_domain, entity_type, entity_id, snapshot)
    }

    #[must_use]
    pub fn entity_updated(
        source_domain: Domain,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        snapshot: serde_json::Value,
    ) -> Self {
        Self::new(SyncEventType::EntityUpdated, source_domain, entity_type, entity_id, snapshot)
    }

    #[must_use]
    pub fn entity_deleted(
        source_domain: Domain,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self::new(
            SyncEventType::EntityDeleted,
            source_domain,
            entity_type,
            entity_id,
            serde_json::Value::Null,
        )
    }

    #[must_use]
    pub fn entity_completed(
        source_domain: Domain,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        snapshot: serde_json::Value,
    ) -> Self {
        Self::new(SyncEventType::EntityCompleted, source_domain, entity_type, entity_id, snapshot)
    }

    /// Returns true once the registry has assigned a sequence number.
    #[must_use]
    pub fn is_stamped(&self) -> bool {
        self.sequence > 0
    }

    /// Reads a top-level string field from an object payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}
