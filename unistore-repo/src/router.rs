//! Entity-type → domain routing.
//!
//! The table is built once from the [`EntityManifest`] and never mutated, so
//! lookups take no locks.

use std::collections::HashMap;
use thiserror::Error;
use unistore_model::{EntityManifest, EntityRegistration, RelationDef, validate_field_name};
use unistore_types::Domain;

/// Routing failures. All of them happen before any adapter is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("entity type {0:?} is not registered")]
    Unregistered(String),

    #[error("entity type {entity_type:?} registered more than once ({first} and {second})")]
    DuplicateRegistration {
        entity_type: String,
        first: Domain,
        second: Domain,
    },

    #[error("entity type names must not be empty")]
    EmptyEntityType,

    #[error("relation {relation:?} on {entity_type:?} targets unregistered type {target_type:?}")]
    UnknownRelationTarget {
        entity_type: String,
        relation: String,
        target_type: String,
    },

    #[error("relation {relation:?} declared twice on {entity_type:?}")]
    DuplicateRelation { entity_type: String, relation: String },

    #[error("relation {relation:?} on {entity_type:?} uses invalid field {field:?}")]
    InvalidRelationField {
        entity_type: String,
        relation: String,
        field: String,
    },
}

#[derive(Debug, Clone)]
struct Route {
    domain: Domain,
    relations: Vec<RelationDef>,
}

/// Maps each registered entity type to exactly one domain.
#[derive(Debug, Clone)]
pub struct DomainRouter {
    routes: HashMap<String, Route>,
    manifest: EntityManifest,
}

impl DomainRouter {
    /// Validates the manifest and builds the routing table.
    pub fn from_manifest(manifest: &EntityManifest) -> Result<Self, RoutingError> {
        let mut routes: HashMap<String, Route> = HashMap::with_capacity(manifest.entities.len());

        for reg in &manifest.entities {
            if reg.entity_type.trim().is_empty() {
                return Err(RoutingError::EmptyEntityType);
            }
            if let Some(existing) = routes.get(&reg.entity_type) {
                return Err(RoutingError::DuplicateRegistration {
                    entity_type: reg.entity_type.clone(),
                    first: existing.domain,
                    second: reg.domain,
                });
            }
            routes.insert(
                reg.entity_type.clone(),
                Route {
                    domain: reg.domain,
                    relations: reg.relations.clone(),
                },
            );
        }

        for reg in &manifest.entities {
            validate_relations(reg, &routes)?;
        }

        Ok(Self {
            routes,
            manifest: manifest.clone(),
        })
    }

    /// The domain that owns `entity_type`.
    pub fn resolve(&self, entity_type: &str) -> Result<Domain, RoutingError> {
        self.routes
            .get(entity_type)
            .map(|r| r.domain)
            .ok_or_else(|| RoutingError::Unregistered(entity_type.to_string()))
    }

    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.routes.contains_key(entity_type)
    }

    /// Registrations in manifest order.
    pub fn registrations(&self) -> &[EntityRegistration] {
        &self.manifest.entities
    }

    pub fn manifest(&self) -> &EntityManifest {
        &self.manifest
    }

    /// Entity types owned by `domain`, in manifest order.
    pub fn entity_types(&self, domain: Domain) -> Vec<&str> {
        self.manifest
            .entities
            .iter()
            .filter(|r| r.domain == domain)
            .map(|r| r.entity_type.as_str())
            .collect()
    }

    /// A declared relation of `entity_type`.
    pub fn relation(&self, entity_type: &str, name: &str) -> Result<Option<&RelationDef>, RoutingError> {
        let route = self
            .routes
            .get(entity_type)
            .ok_or_else(|| RoutingError::Unregistered(entity_type.to_string()))?;
        Ok(route.relations.iter().find(|r| r.name == name))
    }
}

fn validate_relations(reg: &EntityRegistration, routes: &HashMap<String, Route>) -> Result<(), RoutingError> {
    let mut seen = Vec::with_capacity(reg.relations.len());
    for rel in &reg.relations {
        if seen.contains(&rel.name.as_str()) {
            return Err(RoutingError::DuplicateRelation {
                entity_type: reg.entity_type.clone(),
                relation: rel.name.clone(),
            });
        }
        seen.push(rel.name.as_str());

        if !routes.contains_key(&rel.target_type) {
            return Err(RoutingError::UnknownRelationTarget {
                entity_type: reg.entity_type.clone(),
                relation: rel.name.clone(),
                target_type: rel.target_type.clone(),
            });
        }
        if validate_field_name(rel.kind.field()).is_err() {
            return Err(RoutingError::InvalidRelationField {
                entity_type: reg.entity_type.clone(),
                relation: rel.name.clone(),
                field: rel.kind.field().to_string(),
            });
        }
    }
    Ok(())
}
