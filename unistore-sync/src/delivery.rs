//! Delivery of one event to one handler.
//!
//! Each attempt runs in its own task so a panicking handler surfaces as a
//! `JoinError` instead of taking the lane worker down. Attempts are bounded
//! by the handler timeout; the timed-out task is aborted.

use crate::config::RetryPolicy;
use crate::handler::SyncHandler;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use unistore_types::{EventId, SyncEvent, SyncEventType};

/// Where an (event, handler) pair is in its lifecycle.
///
/// `Emitted → Delivering → Delivered`, or
/// `Emitted → Delivering → Retrying → … → DeadLettered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Emitted,
    Delivering,
    Retrying,
    Delivered,
    DeadLettered,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::DeadLettered)
    }
}

/// Final state of one handler for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerOutcome {
    pub handler: String,
    pub state: DeliveryState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What happened to an emitted event once every handler reached a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub event_id: EventId,
    pub event_type: SyncEventType,
    pub entity_id: String,
    pub sequence: u64,
    pub outcomes: Vec<HandlerOutcome>,
}

impl DeliveryReport {
    /// True when every subscribed handler processed the event.
    pub fn is_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.state == DeliveryState::Delivered)
    }

    pub fn dead_lettered(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.state == DeliveryState::DeadLettered)
            .map(|o| o.handler.as_str())
    }

    pub fn outcome(&self, handler: &str) -> Option<&HandlerOutcome> {
        self.outcomes.iter().find(|o| o.handler == handler)
    }
}

/// Runs `handler` against `event` until it succeeds or the retry budget is
/// spent.
pub(crate) async fn deliver(
    handler: Arc<dyn SyncHandler>,
    event: Arc<SyncEvent>,
    policy: &RetryPolicy,
    timeout: Duration,
) -> HandlerOutcome {
    let name = handler.name().to_string();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!(
            handler = %name,
            event_id = %event.id,
            attempt = attempts,
            state = ?DeliveryState::Delivering,
            "delivering event"
        );

        match attempt(&handler, &event, timeout).await {
            Ok(()) => {
                return HandlerOutcome {
                    handler: name,
                    state: DeliveryState::Delivered,
                    attempts,
                    last_error: None,
                };
            }
            Err(err) if attempts >= max_attempts => {
                return HandlerOutcome {
                    handler: name,
                    state: DeliveryState::DeadLettered,
                    attempts,
                    last_error: Some(err),
                };
            }
            Err(err) => {
                let delay = policy.backoff(attempts);
                warn!(
                    handler = %name,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    entity_id = %event.entity_id,
                    attempt = attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "sync handler failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn attempt(handler: &Arc<dyn SyncHandler>, event: &Arc<SyncEvent>, timeout: Duration) -> Result<(), String> {
    let (handler, event) = (Arc::clone(handler), Arc::clone(event));
    let mut task = tokio::spawn(async move { handler.handle(&event).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(format!("{err:#}")),
        Ok(Err(join)) if join.is_panic() => Err(format!("handler panicked: {}", panic_message(join.into_panic()))),
        Ok(Err(join)) => Err(format!("handler task failed: {join}")),
        Err(_) => {
            task.abort();
            Err(format!("handler timed out after {timeout:?}"))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
