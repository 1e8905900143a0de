//! Builds the one repository instance of a process from configuration.

use crate::config::{StoreConfig, UnistoreConfig};
use crate::error::{RepositoryError, RepositoryResult};
use crate::handlers::{CompanionRule, register_default_handlers};
use crate::repository::UnifiedRepository;
use crate::router::DomainRouter;
use std::sync::Arc;
use tracing::info;
use unistore_model::BackendSchema;
use unistore_storage::{BackendAdapter, DocumentAdapter, RelationalAdapter, StorageResult};
use unistore_sync::SyncHookRegistry;
use unistore_types::Domain;

/// Opens both stores, builds the router and registry, and subscribes the
/// default companion handlers.
pub fn bootstrap(config: &UnistoreConfig) -> RepositoryResult<Arc<UnifiedRepository>> {
    let repo = assemble(config)?;
    check_companion_rule(repo.router(), &config.companion)?;
    register_default_handlers(&repo, &config.companion);

    info!(
        primary_types = repo.router().entity_types(Domain::Primary).len(),
        auxiliary_types = repo.router().entity_types(Domain::Auxiliary).len(),
        "unified repository ready"
    );
    Ok(repo)
}

/// Like [`bootstrap`], but with an empty handler registry and no
/// companion rule check.
pub fn bootstrap_without_handlers(config: &UnistoreConfig) -> RepositoryResult<Arc<UnifiedRepository>> {
    assemble(config)
}

fn assemble(config: &UnistoreConfig) -> RepositoryResult<Arc<UnifiedRepository>> {
    config
        .validate()
        .map_err(|e| RepositoryError::Config(e.to_string()))?;

    let router = DomainRouter::from_manifest(&config.manifest)?;

    let primary = open_document(&config.document, config.manifest.backend_schema(Domain::Primary))
        .map_err(|source| RepositoryError::Open {
            domain: Domain::Primary,
            source,
        })?;
    let auxiliary = open_relational(&config.relational, config.manifest.backend_schema(Domain::Auxiliary))
        .map_err(|source| RepositoryError::Open {
            domain: Domain::Auxiliary,
            source,
        })?;

    let registry =
        SyncHookRegistry::new(config.sync.clone()).map_err(|e| RepositoryError::Config(e.to_string()))?;

    Ok(Arc::new(UnifiedRepository::new(
        router,
        primary,
        auxiliary,
        registry,
        config.repository.clone(),
    )))
}

fn open_document(store: &StoreConfig, schema: BackendSchema) -> StorageResult<Arc<dyn BackendAdapter>> {
    let adapter = match &store.path {
        Some(path) => DocumentAdapter::open(path, store.pool_size, schema)?,
        None => DocumentAdapter::open_in_memory(store.pool_size, schema)?,
    };
    Ok(Arc::new(adapter))
}

fn open_relational(store: &StoreConfig, schema: BackendSchema) -> StorageResult<Arc<dyn BackendAdapter>> {
    let adapter = match &store.path {
        Some(path) => RelationalAdapter::open(path, store.pool_size, schema)?,
        None => RelationalAdapter::open_in_memory(schema)?,
    };
    Ok(Arc::new(adapter))
}

fn check_companion_rule(router: &DomainRouter, rule: &CompanionRule) -> RepositoryResult<()> {
    router.resolve(&rule.source_type)?;
    router.resolve(&rule.companion_type)?;
    let declared = router
        .relation(&rule.source_type, &rule.relation)?
        .is_some_and(|r| r.target_type == rule.companion_type);
    if !declared {
        return Err(RepositoryError::Config(format!(
            "companion relation {:?} on {:?} must target {:?}",
            rule.relation, rule.source_type, rule.companion_type
        )));
    }
    Ok(())
}
