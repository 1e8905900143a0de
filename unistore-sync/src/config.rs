use crate::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use unistore_types::SyncEventType;

/// Retry schedule for a failing handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Configuration for the sync hook registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Queue capacity for event types without an explicit entry.
    pub default_queue_capacity: usize,
    /// Per-event-type overrides, keyed by the snake_case event type name.
    pub queue_capacity: BTreeMap<String, usize>,
    /// How long `emit` waits for a free queue slot (ms).
    pub enqueue_wait_ms: u64,
    /// Upper bound on one handler attempt (ms).
    pub handler_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: 256,
            queue_capacity: BTreeMap::new(),
            enqueue_wait_ms: 100,
            handler_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn capacity_for(&self, event_type: SyncEventType) -> usize {
        self.queue_capacity
            .get(event_type.as_str())
            .copied()
            .unwrap_or(self.default_queue_capacity)
    }

    /// Sets one event type's capacity.
    pub fn with_capacity(mut self, event_type: SyncEventType, capacity: usize) -> Self {
        self.queue_capacity.insert(event_type.as_str().to_string(), capacity);
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        for key in self.queue_capacity.keys() {
            SyncEventType::from_str(key)
                .map_err(|_| SyncError::InvalidConfig(format!("unknown event type in queue_capacity: {key:?}")))?;
        }
        for event_type in SyncEventType::ALL {
            if self.capacity_for(event_type) == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "queue capacity for {event_type} must be at least 1"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig("retry.multiplier must be >= 1".into()));
        }
        if self.handler_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig("handler_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
