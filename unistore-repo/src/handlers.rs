//! Default cross-domain sync handlers.
//!
//! A primary-domain source entity (a container) owns one auxiliary-domain
//! companion (its agent state):
//!
//! - [`CompanionProvisioner`] creates the companion when the source is
//!   created and writes the companion id back onto the source.
//! - [`CompletionPropagator`] copies a companion's completion onto its
//!   source.
//! - [`CompanionCleanup`] removes companions of a deleted source.
//!
//! All three are idempotent, so retries and dead-letter replays are safe.
//! They hold the repository weakly; the repository owns the registry that
//! owns them.

use crate::error::RepositoryResult;
use crate::repository::UnifiedRepository;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use unistore_model::{Entity, FieldMap, MAX_QUERY_LIMIT};
use unistore_sync::{SyncEvent, SyncEventType, SyncHandler};

/// Status written on a freshly provisioned companion.
pub const PENDING_STATUS: &str = "pending";

/// Which source type gets which companion, and how they point at each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionRule {
    pub source_type: String,
    pub companion_type: String,
    /// Companion field holding the source id.
    pub link_field: String,
    /// Source relation resolving to the companion.
    pub relation: String,
    /// Source field holding the companion id.
    pub companion_field: String,
}

impl Default for CompanionRule {
    fn default() -> Self {
        Self {
            source_type: "container".to_string(),
            companion_type: "agent-state".to_string(),
            link_field: "container_id".to_string(),
            relation: "companion".to_string(),
            companion_field: "companion_id".to_string(),
        }
    }
}

impl CompanionRule {
    fn link_filter(&self, source_id: &str) -> Value {
        let mut filter = FieldMap::new();
        filter.insert(self.link_field.clone(), Value::String(source_id.to_string()));
        Value::Object(filter)
    }
}

fn upgrade(repo: &Weak<UnifiedRepository>) -> anyhow::Result<Arc<UnifiedRepository>> {
    repo.upgrade().context("repository has been dropped")
}

async fn companions_of(repo: &UnifiedRepository, rule: &CompanionRule, source_id: &str) -> RepositoryResult<Vec<Entity>> {
    let result = repo
        .query(&rule.companion_type, &rule.link_filter(source_id), MAX_QUERY_LIMIT, None, None)
        .await?;
    Ok(result.items)
}

/// Creates the companion of a newly created source entity.
pub struct CompanionProvisioner {
    repo: Weak<UnifiedRepository>,
    rule: CompanionRule,
}

impl CompanionProvisioner {
    pub fn new(repo: Weak<UnifiedRepository>, rule: CompanionRule) -> Self {
        Self { repo, rule }
    }
}

#[async_trait]
impl SyncHandler for CompanionProvisioner {
    fn name(&self) -> &str {
        "companion-provisioner"
    }

    async fn handle(&self, event: &SyncEvent) -> anyhow::Result<()> {
        if event.entity_type != self.rule.source_type {
            return Ok(());
        }
        let repo = upgrade(&self.repo)?;
        let source_id = event.entity_id.as_str();

        let mut found = companions_of(&repo, &self.rule, source_id).await?;
        if found.is_empty() {
            let mut data = FieldMap::new();
            data.insert(self.rule.link_field.clone(), Value::String(source_id.to_string()));
            data.insert("status".to_string(), Value::String(PENDING_STATUS.to_string()));
            let companion = repo
                .create(&self.rule.companion_type, data, None)
                .await?
                .into_value()?;
            info!(
                source_type = %self.rule.source_type,
                source_id,
                companion_id = %companion.id,
                "provisioned companion"
            );
            // A timed-out earlier attempt may have committed its own insert.
            found = companions_of(&repo, &self.rule, source_id).await?;
        } else {
            debug!(source_id, companion_id = %found[0].id, "companion already provisioned");
        }

        // Ids sort in creation order, so every attempt keeps the same one.
        let Some((keeper, duplicates)) = found.split_first() else {
            warn!(source_id, "companion removed while provisioning");
            return Ok(());
        };
        for duplicate in duplicates {
            repo.delete(&self.rule.companion_type, &duplicate.id, None)
                .await?
                .into_value()?;
            warn!(source_id, kept = %keeper.id, removed = %duplicate.id, "removed duplicate companion");
        }
        let companion_id = keeper.id.clone();

        let Some(source) = repo
            .get_by_id(&self.rule.source_type, source_id, None)
            .await?
            .into_first()
        else {
            warn!(source_id, companion_id = %companion_id, "source removed before back-reference was written");
            return Ok(());
        };
        if source.get_str(&self.rule.companion_field) == Some(companion_id.as_str()) {
            return Ok(());
        }

        let mut patch = FieldMap::new();
        patch.insert(self.rule.companion_field.clone(), Value::String(companion_id));
        repo.update(&self.rule.source_type, source_id, patch, None)
            .await?
            .into_value()?;
        Ok(())
    }
}

/// Marks the source entity completed when its companion completes.
pub struct CompletionPropagator {
    repo: Weak<UnifiedRepository>,
    rule: CompanionRule,
}

impl CompletionPropagator {
    pub fn new(repo: Weak<UnifiedRepository>, rule: CompanionRule) -> Self {
        Self { repo, rule }
    }
}

#[async_trait]
impl SyncHandler for CompletionPropagator {
    fn name(&self) -> &str {
        "completion-propagator"
    }

    async fn handle(&self, event: &SyncEvent) -> anyhow::Result<()> {
        if event.entity_type != self.rule.companion_type {
            return Ok(());
        }
        let repo = upgrade(&self.repo)?;

        let companion = match Entity::from_snapshot(&event.payload) {
            Some(companion) => companion,
            None => match repo
                .get_by_id(&self.rule.companion_type, &event.entity_id, None)
                .await?
                .into_first()
            {
                Some(companion) => companion,
                None => {
                    warn!(companion_id = %event.entity_id, "completed companion no longer exists");
                    return Ok(());
                }
            },
        };
        let Some(source_id) = companion.get_str(&self.rule.link_field) else {
            warn!(companion_id = %companion.id, field = %self.rule.link_field, "companion has no source link");
            return Ok(());
        };

        let mut patch = FieldMap::new();
        patch.insert("companion_status".to_string(), Value::String("completed".to_string()));
        patch.insert("completed_at".to_string(), Value::String(event.timestamp.to_rfc3339()));
        if let Some(outcome) = companion.get("outcome") {
            patch.insert("outcome".to_string(), outcome.clone());
        }

        match repo.update(&self.rule.source_type, source_id, patch, None).await {
            Ok(outcome) => {
                outcome.into_value()?;
                info!(source_id, companion_id = %companion.id, "propagated companion completion");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                warn!(source_id, companion_id = %companion.id, "source of completed companion is gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Deletes the companions of a deleted source entity.
pub struct CompanionCleanup {
    repo: Weak<UnifiedRepository>,
    rule: CompanionRule,
}

impl CompanionCleanup {
    pub fn new(repo: Weak<UnifiedRepository>, rule: CompanionRule) -> Self {
        Self { repo, rule }
    }
}

#[async_trait]
impl SyncHandler for CompanionCleanup {
    fn name(&self) -> &str {
        "companion-cleanup"
    }

    async fn handle(&self, event: &SyncEvent) -> anyhow::Result<()> {
        if event.entity_type != self.rule.source_type {
            return Ok(());
        }
        let repo = upgrade(&self.repo)?;

        for companion in companions_of(&repo, &self.rule, &event.entity_id).await? {
            let removed = repo
                .delete(&self.rule.companion_type, &companion.id, None)
                .await?
                .into_value()?;
            if removed {
                info!(source_id = %event.entity_id, companion_id = %companion.id, "removed companion of deleted source");
            }
        }
        Ok(())
    }
}

/// Subscribes the three companion handlers on the repository's registry.
pub fn register_default_handlers(repo: &Arc<UnifiedRepository>, rule: &CompanionRule) {
    let registry = repo.registry();
    registry.register(
        SyncEventType::EntityCreated,
        Arc::new(CompanionProvisioner::new(Arc::downgrade(repo), rule.clone())),
    );
    registry.register(
        SyncEventType::EntityCompleted,
        Arc::new(CompletionPropagator::new(Arc::downgrade(repo), rule.clone())),
    );
    registry.register(
        SyncEventType::EntityDeleted,
        Arc::new(CompanionCleanup::new(Arc::downgrade(repo), rule.clone())),
    );
}
