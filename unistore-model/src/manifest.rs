use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use unistore_types::Domain;

/// How a named relation is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// The source entity's `field` holds the target id (or an array of ids).
    Forward { field: String },
    /// Targets whose `field` holds the source entity's id.
    Reverse { field: String },
}

impl RelationKind {
    pub fn field(&self) -> &str {
        match self {
            RelationKind::Forward { field } | RelationKind::Reverse { field } => field,
        }
    }
}

/// One entry of an entity type's relation allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub target_type: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}

impl RelationDef {
    pub fn forward(name: &str, target_type: &str, field: &str) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            kind: RelationKind::Forward { field: field.into() },
        }
    }

    pub fn reverse(name: &str, target_type: &str, field: &str) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            kind: RelationKind::Reverse { field: field.into() },
        }
    }
}

/// Registers one entity type to exactly one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRegistration {
    #[serde(rename = "name")]
    pub entity_type: String,
    pub domain: Domain,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityRegistration {
    pub fn new(entity_type: &str, domain: Domain) -> Self {
        Self {
            entity_type: entity_type.into(),
            domain,
            relations: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }
}

/// The startup registration table: which domain owns which entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityManifest {
    #[serde(default)]
    pub entities: Vec<EntityRegistration>,
}

impl EntityManifest {
    pub fn new(entities: Vec<EntityRegistration>) -> Self {
        Self { entities }
    }

    /// The notes application's registrations.
    ///
    /// Containers and notes live in the document store; the per-container
    /// agent state, its task runs, and model configuration records live in
    /// the relational store.
    pub fn notes_default() -> Self {
        Self::new(vec![
            EntityRegistration::new("container", Domain::Primary)
                .with_relation(RelationDef::reverse("notes", "note", "container_id"))
                .with_relation(RelationDef::reverse("companion", "agent-state", "container_id")),
            EntityRegistration::new("note", Domain::Primary)
                .with_relation(RelationDef::forward("container", "container", "container_id"))
                .with_relation(RelationDef::forward("links", "note", "links"))
                .with_relation(RelationDef::reverse("backlinks", "note", "links")),
            EntityRegistration::new("agent-state", Domain::Auxiliary)
                .with_relation(RelationDef::forward("container", "container", "container_id"))
                .with_relation(RelationDef::reverse("runs", "task-run", "agent_state_id")),
            EntityRegistration::new("task-run", Domain::Auxiliary)
                .with_relation(RelationDef::forward("agent_state", "agent-state", "agent_state_id")),
            EntityRegistration::new("model-config", Domain::Auxiliary),
        ])
    }

    pub fn registration(&self, entity_type: &str) -> Option<&EntityRegistration> {
        self.entities.iter().find(|r| r.entity_type == entity_type)
    }

    /// The subset of the manifest one backend needs: the types it owns and
    /// the relations it can resolve on its own (both ends in its domain).
    pub fn backend_schema(&self, domain: Domain) -> BackendSchema {
        let entity_types: BTreeSet<String> = self
            .entities
            .iter()
            .filter(|r| r.domain == domain)
            .map(|r| r.entity_type.clone())
            .collect();

        let relations = self
            .entities
            .iter()
            .filter(|r| r.domain == domain)
            .map(|r| {
                let local: Vec<RelationDef> = r
                    .relations
                    .iter()
                    .filter(|rel| entity_types.contains(&rel.target_type))
                    .cloned()
                    .collect();
                (r.entity_type.clone(), local)
            })
            .collect();

        BackendSchema {
            entity_types,
            relations,
        }
    }
}

/// Per-backend view of the manifest.
#[derive(Debug, Clone, Default)]
pub struct BackendSchema {
    entity_types: BTreeSet<String>,
    relations: BTreeMap<String, Vec<RelationDef>>,
}

impl BackendSchema {
    pub fn serves(&self, entity_type: &str) -> bool {
        self.entity_types.contains(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entity_types.iter().map(String::as_str)
    }

    /// Looks up a same-backend relation on the allow-list.
    pub fn relation(&self, entity_type: &str, name: &str) -> Option<&RelationDef> {
        self.relations
            .get(entity_type)?
            .iter()
            .find(|r| r.name == name)
    }

    /// Fields of `entity_type` that hold ids of other entities in this
    /// backend: its own forward relations plus the fields reverse relations
    /// elsewhere point at.
    pub fn link_fields(&self, entity_type: &str) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        for (source_type, defs) in &self.relations {
            for def in defs {
                match &def.kind {
                    RelationKind::Forward { field } if source_type == entity_type => {
                        fields.insert(field.clone());
                    }
                    RelationKind::Reverse { field } if def.target_type == entity_type => {
                        fields.insert(field.clone());
                    }
                    _ => {}
                }
            }
        }
        fields
    }
}
