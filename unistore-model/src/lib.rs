//! Core entity model for the unified data access layer.
//!
//! Defines the backend-neutral types both storage adapters speak:
//! - [`Entity`]: id, type tag, ordered field map, timestamps
//! - [`Filters`]: the flat equality/range filters accepted by `query`
//! - [`QueryResult`]: the wrapper every read returns, naming the backend that served it
//! - [`EntityManifest`]: the static entity-type → domain registration table,
//!   including each type's relation allow-list
//!
//! Nothing here performs I/O. Validation that must happen "before any I/O"
//! (filter shapes, cursors, limits) lives here so both adapters share it.

mod entity;
mod filter;
mod manifest;
mod query;

pub use entity::{Entity, FieldMap};
pub use filter::{Condition, FilterError, FilterOp, Filters, validate_field_name};
pub use manifest::{BackendSchema, EntityManifest, EntityRegistration, RelationDef, RelationKind};
pub use query::{BackendKind, Cursor, IdPolicy, MAX_QUERY_LIMIT, QueryResult, validate_limit};
