//! Identifiers minted by the data access layer.
//!
//! Entity ids cross the adapter boundary as plain strings; [`EntityId`] only
//! exists so both backends mint them the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Backend-assigned identifier for an entity.
///
/// UUID v7, so the string form sorts in creation order. The adapters page
/// by id and rely on that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityId(Uuid);

impl EntityId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Unique identifier for a sync event; carried in delivery reports and
/// dead letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
