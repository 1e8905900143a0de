//! The uniform capability set every backend implements.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use unistore_model::{BackendKind, BackendSchema, Cursor, Entity, FieldMap, Filters, IdPolicy, QueryResult};

/// One physical store behind the repository facade.
///
/// Implementations are peers: the router picks one per call and nothing
/// ever layers one adapter over another. Relation names are validated
/// against the adapter's static allow-list.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which backend this is; copied into every [`QueryResult`].
    fn kind(&self) -> BackendKind;

    /// What happens to an `id` key supplied in create/update data.
    fn id_policy(&self) -> IdPolicy;

    /// Entity types and relations this adapter serves.
    fn schema(&self) -> &BackendSchema;

    /// Entities of `entity_type` matching `filters`, ordered by id.
    async fn query(
        &self,
        entity_type: &str,
        filters: &Filters,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> StorageResult<QueryResult<Entity>>;

    /// Zero or one entity; absence is not an error.
    async fn get_by_id(&self, entity_type: &str, id: &str) -> StorageResult<QueryResult<Entity>>;

    /// Stores a new entity under a backend-assigned id.
    async fn create(&self, entity_type: &str, data: FieldMap) -> StorageResult<Entity>;

    /// Merges `data` into an existing entity. Fails with `NotFound` if absent.
    async fn update(&self, entity_type: &str, id: &str, data: FieldMap) -> StorageResult<Entity>;

    /// Returns `true` if a record was removed, `false` if it was already gone.
    async fn delete(&self, entity_type: &str, id: &str) -> StorageResult<bool>;

    /// Resolves a named relation from the allow-list.
    async fn get_related(
        &self,
        entity_type: &str,
        id: &str,
        relation: &str,
    ) -> StorageResult<QueryResult<Entity>>;
}

/// Checks shared by both adapters before any I/O.
pub(crate) fn ensure_served(schema: &BackendSchema, kind: BackendKind, entity_type: &str) -> StorageResult<()> {
    if schema.serves(entity_type) {
        Ok(())
    } else {
        Err(StorageError::Validation(format!(
            "entity type {entity_type:?} is not served by {kind}"
        )))
    }
}

/// Applies the adapter's id policy to incoming write data.
pub(crate) fn apply_id_policy(policy: IdPolicy, kind: BackendKind, mut data: FieldMap) -> StorageResult<FieldMap> {
    if data.contains_key("id") {
        match policy {
            IdPolicy::Reject => {
                return Err(StorageError::Validation(format!(
                    "{kind} assigns ids itself; remove the \"id\" field"
                )));
            }
            IdPolicy::Ignore => {
                data.shift_remove("id");
            }
        }
    }
    Ok(data)
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
