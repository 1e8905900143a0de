//! Unified data access layer.
//!
//! [`UnifiedRepository`] is the only way callers touch persisted entities.
//! Each entity type is registered to one [`Domain`]; the [`DomainRouter`]
//! picks the owning backend adapter for every call, and committed writes are
//! announced on the [`SyncHookRegistry`] so cross-domain consistency can be
//! maintained by handlers (see [`handlers`]).
//!
//! ```no_run
//! use unistore_repo::{UnistoreConfig, bootstrap};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let repo = bootstrap(&UnistoreConfig::default())?;
//! let mut data = serde_json::Map::new();
//! data.insert("name".into(), "inbox".into());
//! let container = repo.create("container", data, None).await?.into_value()?;
//! repo.drain(std::time::Duration::from_secs(5)).await?;
//! let companion = repo.get_related("container", &container.id, "companion", None).await?;
//! assert_eq!(companion.count, 1);
//! # Ok(())
//! # }
//! ```

mod bootstrap;
mod config;
mod error;
pub mod handlers;
mod outcome;
mod repository;
mod router;

pub use bootstrap::{bootstrap, bootstrap_without_handlers};
pub use config::{ConfigError, RepositoryConfig, StoreConfig, UnistoreConfig};
pub use error::{ErrorKind, Operation, RepositoryError, RepositoryResult};
pub use handlers::{CompanionRule, register_default_handlers};
pub use outcome::{PartialCommitWarning, SyncDispatch, WriteOutcome};
pub use repository::UnifiedRepository;
pub use router::{DomainRouter, RoutingError};

pub use unistore_types::Domain;
