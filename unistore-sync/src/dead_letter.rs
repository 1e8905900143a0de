use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use unistore_types::{SyncEvent, Timestamp};

/// Identifier of one dead-lettered (event, handler) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeadLetterId(u64);

impl DeadLetterId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dl-{}", self.0)
    }
}

/// An event a handler could not process within its retry budget.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: DeadLetterId,
    pub event: SyncEvent,
    pub handler: String,
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: Timestamp,
}

#[derive(Default)]
pub(crate) struct DeadLetterQueue {
    inner: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    letters: Vec<DeadLetter>,
}

impl DeadLetterQueue {
    pub(crate) fn push(&self, event: SyncEvent, handler: &str, attempts: u32, last_error: String) -> DeadLetterId {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries.next_id += 1;
        let id = DeadLetterId(entries.next_id);
        entries.letters.push(DeadLetter {
            id,
            event,
            handler: handler.to_string(),
            attempts,
            last_error,
            dead_lettered_at: Timestamp::now(),
        });
        id
    }

    /// Puts a previously taken entry back, keeping its id.
    pub(crate) fn restore(&self, letter: DeadLetter) {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = entries.letters.partition_point(|l| l.id < letter.id);
        entries.letters.insert(pos, letter);
    }

    pub(crate) fn take(&self, id: DeadLetterId) -> Option<DeadLetter> {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = entries.letters.iter().position(|l| l.id == id)?;
        Some(entries.letters.remove(pos))
    }

    pub(crate) fn snapshot(&self) -> Vec<DeadLetter> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).letters.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).letters.len()
    }
}
