use pretty_assertions::assert_eq;
use unistore_model::{EntityManifest, EntityRegistration, RelationDef};
use unistore_repo::{Domain, DomainRouter, RoutingError};

#[test]
fn every_registered_type_resolves_to_exactly_one_domain() {
    let manifest = EntityManifest::notes_default();
    let router = DomainRouter::from_manifest(&manifest).unwrap();

    for reg in &manifest.entities {
        assert_eq!(router.resolve(&reg.entity_type).unwrap(), reg.domain);
    }
    assert_eq!(router.entity_types(Domain::Primary), vec!["container", "note"]);
    assert_eq!(
        router.entity_types(Domain::Auxiliary),
        vec!["agent-state", "task-run", "model-config"]
    );
    assert_eq!(router.registrations().len(), manifest.entities.len());
}

#[test]
fn unregistered_type_is_a_routing_error() {
    let router = DomainRouter::from_manifest(&EntityManifest::notes_default()).unwrap();
    assert_eq!(
        router.resolve("spaceship"),
        Err(RoutingError::Unregistered("spaceship".into()))
    );
    assert!(!router.is_registered("spaceship"));
    assert!(router.relation("spaceship", "x").is_err());
}

#[test]
fn duplicate_registration_is_rejected() {
    let manifest = EntityManifest::new(vec![
        EntityRegistration::new("task", Domain::Primary),
        EntityRegistration::new("task", Domain::Auxiliary),
    ]);
    let err = DomainRouter::from_manifest(&manifest).unwrap_err();
    assert_eq!(
        err,
        RoutingError::DuplicateRegistration {
            entity_type: "task".into(),
            first: Domain::Primary,
            second: Domain::Auxiliary,
        }
    );
}

#[test]
fn empty_type_name_is_rejected() {
    let manifest = EntityManifest::new(vec![EntityRegistration::new("  ", Domain::Primary)]);
    assert_eq!(
        DomainRouter::from_manifest(&manifest).unwrap_err(),
        RoutingError::EmptyEntityType
    );
}

#[test]
fn relation_targets_must_be_registered() {
    let manifest = EntityManifest::new(vec![
        EntityRegistration::new("board", Domain::Primary)
            .with_relation(RelationDef::reverse("cards", "card", "board_id")),
    ]);
    let err = DomainRouter::from_manifest(&manifest).unwrap_err();
    assert!(matches!(err, RoutingError::UnknownRelationTarget { ref target_type, .. } if target_type == "card"));
}

#[test]
fn relation_names_are_unique_and_fields_valid() {
    let duplicate = EntityManifest::new(vec![
        EntityRegistration::new("card", Domain::Primary)
            .with_relation(RelationDef::forward("parent", "card", "parent_id"))
            .with_relation(RelationDef::forward("parent", "card", "other_id")),
    ]);
    assert!(matches!(
        DomainRouter::from_manifest(&duplicate).unwrap_err(),
        RoutingError::DuplicateRelation { .. }
    ));

    let bad_field = EntityManifest::new(vec![
        EntityRegistration::new("card", Domain::Primary)
            .with_relation(RelationDef::forward("parent", "card", "parent.id")),
    ]);
    assert!(matches!(
        DomainRouter::from_manifest(&bad_field).unwrap_err(),
        RoutingError::InvalidRelationField { .. }
    ));
}

#[test]
fn relation_lookup_includes_cross_domain_relations() {
    let router = DomainRouter::from_manifest(&EntityManifest::notes_default()).unwrap();
    let companion = router.relation("container", "companion").unwrap().unwrap();
    assert_eq!(companion.target_type, "agent-state");
    assert_eq!(router.resolve(&companion.target_type).unwrap(), Domain::Auxiliary);
    assert!(router.relation("container", "nope").unwrap().is_none());
}
