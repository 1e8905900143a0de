//! Sync hook registry for the unified data access layer.
//!
//! Committed mutations are turned into [`SyncEvent`]s by the repository
//! facade and emitted here. The registry guarantees:
//!
//! - **Per-entity ordering**: events for one entity id are stamped with an
//!   increasing sequence and delivered in that order.
//! - **Bounded queues**: each event type has a fixed number of in-flight
//!   slots; emitters wait a bounded time and then get
//!   [`SyncError::Backpressure`].
//! - **Supervised delivery**: every handler attempt is timed, panics are
//!   caught, failures are retried with exponential backoff, and exhausted
//!   events land on the dead-letter list exactly once.
//!
//! # Example
//!
//! ```no_run
//! use unistore_sync::{SyncConfig, SyncHookRegistry};
//! use unistore_types::{Domain, SyncEvent, SyncEventType};
//!
//! # async fn demo() -> unistore_sync::SyncResult<()> {
//! let registry = SyncHookRegistry::new(SyncConfig::default())?;
//! registry.register_fn(SyncEventType::EntityCreated, "audit", |event| async move {
//!     tracing::info!(entity_id = %event.entity_id, "created");
//!     Ok(())
//! });
//!
//! let event = SyncEvent::entity_created(Domain::Primary, "note", "n-1", serde_json::json!({}));
//! let report = registry.emit(event).await?.wait().await?;
//! assert!(report.is_delivered());
//! # Ok(())
//! # }
//! ```

mod config;
mod dead_letter;
mod delivery;
mod error;
mod handler;
mod registry;

pub use config::{RetryPolicy, SyncConfig};
pub use dead_letter::{DeadLetter, DeadLetterId};
pub use delivery::{DeliveryReport, DeliveryState, HandlerOutcome};
pub use error::{SyncError, SyncResult};
pub use handler::{FnHandler, SyncHandler, handler_fn};
pub use registry::{EmitHandle, SyncHookRegistry};

pub use unistore_types::{SyncEvent, SyncEventType};
