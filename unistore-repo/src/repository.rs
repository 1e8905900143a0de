//! The single entry point for entity persistence.
//!
//! Every call resolves the entity type's domain, hands the work to the
//! owning adapter under the caller's timeout, and wraps the result. Writes
//! that commit are announced on the sync hook registry; reads never emit.

use crate::config::RepositoryConfig;
use crate::error::{Operation, RepositoryError, RepositoryResult};
use crate::outcome::{PartialCommitWarning, SyncDispatch, WriteOutcome};
use crate::router::DomainRouter;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use unistore_model::{
    Cursor, Entity, FieldMap, Filters, MAX_QUERY_LIMIT, QueryResult, RelationDef, RelationKind, validate_limit,
};
use unistore_storage::{BackendAdapter, StorageError, StorageResult};
use unistore_sync::{SyncError, SyncHookRegistry};
use unistore_types::{Domain, SyncEvent};

/// Facade over the two domain stores and the sync hook registry.
pub struct UnifiedRepository {
    router: DomainRouter,
    primary: Arc<dyn BackendAdapter>,
    auxiliary: Arc<dyn BackendAdapter>,
    registry: SyncHookRegistry,
    config: RepositoryConfig,
}

impl UnifiedRepository {
    pub fn new(
        router: DomainRouter,
        primary: Arc<dyn BackendAdapter>,
        auxiliary: Arc<dyn BackendAdapter>,
        registry: SyncHookRegistry,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            router,
            primary,
            auxiliary,
            registry,
            config,
        }
    }

    pub fn router(&self) -> &DomainRouter {
        &self.router
    }

    pub fn registry(&self) -> &SyncHookRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// The adapter serving `domain`.
    pub fn adapter(&self, domain: Domain) -> &Arc<dyn BackendAdapter> {
        match domain {
            Domain::Primary => &self.primary,
            Domain::Auxiliary => &self.auxiliary,
        }
    }

    /// Waits for every emitted sync event to be delivered or dead-lettered.
    pub async fn drain(&self, timeout: Duration) -> Result<(), SyncError> {
        self.registry.drain(timeout).await
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Entities of `entity_type` matching the flat filter object, in id order.
    pub async fn query(
        &self,
        entity_type: &str,
        filters: &Value,
        limit: usize,
        cursor: Option<&Cursor>,
        timeout: Option<Duration>,
    ) -> RepositoryResult<QueryResult<Entity>> {
        let domain = self.router.resolve(entity_type)?;
        let filters = Filters::parse(filters)?;
        validate_limit(limit)?;
        if let Some(cursor) = cursor {
            cursor.last_id()?;
        }

        let adapter = self.adapter(domain);
        self.read(
            entity_type,
            Operation::Query,
            domain,
            timeout,
            adapter.query(entity_type, &filters, limit, cursor),
        )
        .await
    }

    /// Zero or one entity. A missing id is an empty result, not an error.
    pub async fn get_by_id(
        &self,
        entity_type: &str,
        id: &str,
        timeout: Option<Duration>,
    ) -> RepositoryResult<QueryResult<Entity>> {
        let domain = self.router.resolve(entity_type)?;
        let adapter = self.adapter(domain);
        self.read(entity_type, Operation::GetById, domain, timeout, adapter.get_by_id(entity_type, id))
            .await
    }

    /// Follows a declared relation. Relations whose target lives in the
    /// other domain are resolved here, one adapter call at a time.
    pub async fn get_related(
        &self,
        entity_type: &str,
        id: &str,
        relation: &str,
        timeout: Option<Duration>,
    ) -> RepositoryResult<QueryResult<Entity>> {
        let domain = self.router.resolve(entity_type)?;
        let def = self
            .router
            .relation(entity_type, relation)?
            .cloned()
            .ok_or_else(|| RepositoryError::UnknownRelation {
                entity_type: entity_type.to_string(),
                relation: relation.to_string(),
            })?;
        let target_domain = self.router.resolve(&def.target_type)?;

        if target_domain == domain {
            let adapter = self.adapter(domain);
            return self
                .read(
                    entity_type,
                    Operation::GetRelated,
                    domain,
                    timeout,
                    adapter.get_related(entity_type, id, relation),
                )
                .await;
        }

        let started = Instant::now();
        let timeout = self.effective_timeout(timeout);
        let work = self.resolve_cross_domain(entity_type, domain, id, &def, target_domain);
        let items = match tokio::time::timeout(timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RepositoryError::backend(
                    entity_type,
                    Operation::GetRelated,
                    domain,
                    StorageError::Timeout(timeout),
                ));
            }
        };
        debug!(entity_type, relation, count = items.len(), "resolved cross-domain relation");
        Ok(QueryResult::new(items, self.adapter(target_domain).kind(), started, None))
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Stores a new entity and emits `EntityCreated`.
    pub async fn create(
        &self,
        entity_type: &str,
        data: FieldMap,
        timeout: Option<Duration>,
    ) -> RepositoryResult<WriteOutcome<Entity>> {
        let domain = self.router.resolve(entity_type)?;
        let adapter = self.adapter(domain);
        let entity = match self
            .write(entity_type, Operation::Create, domain, timeout, adapter.create(entity_type, data))
            .await?
        {
            Ok(entity) => entity,
            Err(warning) => return Ok(WriteOutcome::Unknown(warning)),
        };
        debug!(entity_type, id = %entity.id, %domain, "entity created");

        let event = SyncEvent::entity_created(domain, entity_type, &entity.id, entity.to_snapshot());
        let sync = vec![self.dispatch(event).await];
        Ok(WriteOutcome::Committed { value: entity, sync })
    }

    /// Merges `data` into an existing entity and emits `EntityUpdated`, plus
    /// `EntityCompleted` when the update moved the entity into its
    /// completed state.
    pub async fn update(
        &self,
        entity_type: &str,
        id: &str,
        data: FieldMap,
        timeout: Option<Duration>,
    ) -> RepositoryResult<WriteOutcome<Entity>> {
        let domain = self.router.resolve(entity_type)?;
        let completing = data.get(&self.config.completion_field) == Some(&self.config.completion_value);

        let adapter = self.adapter(domain);
        let entity = match self
            .write(entity_type, Operation::Update, domain, timeout, adapter.update(entity_type, id, data))
            .await?
        {
            Ok(entity) => entity,
            Err(warning) => return Ok(WriteOutcome::Unknown(warning)),
        };
        debug!(entity_type, id = %entity.id, %domain, "entity updated");

        let snapshot = entity.to_snapshot();
        let mut sync = vec![
            self.dispatch(SyncEvent::entity_updated(domain, entity_type, &entity.id, snapshot.clone()))
                .await,
        ];
        if completing && entity.get(&self.config.completion_field) == Some(&self.config.completion_value) {
            sync.push(
                self.dispatch(SyncEvent::entity_completed(domain, entity_type, &entity.id, snapshot))
                    .await,
            );
        }
        Ok(WriteOutcome::Committed { value: entity, sync })
    }

    /// Removes an entity. `false` when it was already gone; only an actual
    /// removal emits `EntityDeleted`.
    pub async fn delete(
        &self,
        entity_type: &str,
        id: &str,
        timeout: Option<Duration>,
    ) -> RepositoryResult<WriteOutcome<bool>> {
        let domain = self.router.resolve(entity_type)?;
        let adapter = self.adapter(domain);
        let removed = match self
            .write(entity_type, Operation::Delete, domain, timeout, adapter.delete(entity_type, id))
            .await?
        {
            Ok(removed) => removed,
            Err(warning) => return Ok(WriteOutcome::Unknown(warning)),
        };

        let mut sync = Vec::new();
        if removed {
            debug!(entity_type, id, %domain, "entity deleted");
            sync.push(self.dispatch(SyncEvent::entity_deleted(domain, entity_type, id)).await);
        }
        Ok(WriteOutcome::Committed { value: removed, sync })
    }

    // ── Internals ────────────────────────────────────────────────

    fn effective_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.config.default_timeout())
    }

    async fn read<T>(
        &self,
        entity_type: &str,
        operation: Operation,
        domain: Domain,
        timeout: Option<Duration>,
        work: impl Future<Output = StorageResult<T>>,
    ) -> RepositoryResult<T> {
        let timeout = self.effective_timeout(timeout);
        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(RepositoryError::backend(entity_type, operation, domain, source)),
            Err(_) => Err(RepositoryError::backend(
                entity_type,
                operation,
                domain,
                StorageError::Timeout(timeout),
            )),
        }
    }

    /// Like `read`, but a timeout is not an error: the write may already be
    /// committed, so the caller gets a warning instead.
    async fn write<T>(
        &self,
        entity_type: &str,
        operation: Operation,
        domain: Domain,
        timeout: Option<Duration>,
        work: impl Future<Output = StorageResult<T>>,
    ) -> RepositoryResult<Result<T, PartialCommitWarning>> {
        let timeout = self.effective_timeout(timeout);
        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(value)) => Ok(Ok(value)),
            Ok(Err(source)) => Err(RepositoryError::backend(entity_type, operation, domain, source)),
            Err(_) => {
                let warning = PartialCommitWarning {
                    entity_type: entity_type.to_string(),
                    operation,
                    domain,
                    timeout,
                };
                warn!(%warning, "write outcome unknown, no sync event emitted");
                Ok(Err(warning))
            }
        }
    }

    async fn dispatch(&self, event: SyncEvent) -> SyncDispatch {
        let event_type = event.event_type;
        let entity_id = event.entity_id.clone();
        match self.registry.emit(event).await {
            Ok(handle) => SyncDispatch::Emitted(handle),
            Err(error) => {
                warn!(
                    event_type = %event_type,
                    entity_id = %entity_id,
                    error = %error,
                    "sync event not emitted; the write is committed"
                );
                SyncDispatch::Rejected { event_type, error }
            }
        }
    }

    async fn resolve_cross_domain(
        &self,
        entity_type: &str,
        domain: Domain,
        id: &str,
        def: &RelationDef,
        target_domain: Domain,
    ) -> RepositoryResult<Vec<Entity>> {
        let source_err = |e: StorageError| RepositoryError::backend(entity_type, Operation::GetRelated, domain, e);
        let target_err = |e: StorageError| RepositoryError::backend(&def.target_type, Operation::GetRelated, target_domain, e);
        let target = self.adapter(target_domain);

        match &def.kind {
            RelationKind::Forward { field } => {
                let source = self
                    .adapter(domain)
                    .get_by_id(entity_type, id)
                    .await
                    .map_err(source_err)?;
                let Some(source) = source.into_first() else {
                    return Ok(Vec::new());
                };

                let mut items = Vec::new();
                let ids: BTreeSet<String> = source.linked_ids(field).into_iter().collect();
                for target_id in ids {
                    let found = target
                        .get_by_id(&def.target_type, &target_id)
                        .await
                        .map_err(target_err)?;
                    items.extend(found.into_first());
                }
                Ok(items)
            }
            // Same matching as the adapters' own reverse relations: the
            // link field may hold the id itself or an array containing it.
            RelationKind::Reverse { field } => {
                let filters = Filters::none();
                let mut items = Vec::new();
                let mut cursor = None;
                loop {
                    let page = target
                        .query(&def.target_type, &filters, MAX_QUERY_LIMIT, cursor.as_ref())
                        .await
                        .map_err(target_err)?;
                    items.extend(
                        page.items
                            .into_iter()
                            .filter(|candidate| candidate.linked_ids(field).iter().any(|linked| linked == id)),
                    );
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Ok(items)
            }
        }
    }
}
