use contentstore_core::db::open_db_in_memory;
use contentstore_core::{
    CreateEntity, Entity, EntityStore, EntityValidationError, NewAttributeDefinition, StoreError,
    TypedValue, Values,
};
use serde_json::json;

fn payload(value: serde_json::Value) -> Values {
    serde_json::from_value(value).unwrap()
}

fn movie(store: &EntityStore<'_>) -> Entity {
    store
        .create(
            CreateEntity::new(payload(json!({
                "type": "movie",
                "title": "Heat",
                "href": "/movies/heat",
                "content": "Crime drama",
                "created_by": 7,
                "rating": 8.5,
                "genre": "crime"
            })))
            .with_definitions(
                vec![
                    NewAttributeDefinition::new("rating", "number"),
                    NewAttributeDefinition::new("genre", "string"),
                ],
                false,
            ),
        )
        .unwrap()
}

fn alias_of(store: &EntityStore<'_>, original: &Entity, extra: serde_json::Value) -> Entity {
    let mut values = payload(json!({"type": original.kind, "alias_id": original.id}));
    values.extend(payload(extra));
    store.create(CreateEntity::new(values)).unwrap()
}

#[test]
fn alias_reads_inherit_unset_core_fields() {
    let conn = open_db_in_memory().unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let original = movie(&store);
    let alias = alias_of(&store, &original, json!({"title": "Heat (mine)", "content": "My copy"}));

    assert_eq!(alias.title, "Heat (mine)");
    assert_eq!(alias.href, None);

    let resolved = store.get(alias.id).unwrap();
    assert_eq!(resolved.href.as_deref(), Some("/movies/heat"));
    assert_eq!(resolved.content.as_deref(), Some("My copy"));
    assert_eq!(resolved.created_by, Some(7));
    assert_eq!(resolved.alias_id, Some(original.id));
    assert_eq!(store.original(&alias).unwrap(), Some(original.clone()));
    assert_eq!(store.original(&original).unwrap(), None);
}

#[test]
fn alias_attributes_fall_back_to_original() {
    let conn = open_db_in_memory().unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let original = movie(&store);
    let alias = alias_of(&store, &original, json!({"title": "Heat (thriller)", "genre": "thriller"}));

    assert_eq!(
        store.attribute(&alias, "genre").unwrap(),
        Some(TypedValue::String("thriller".to_string()))
    );
    assert_eq!(
        store.attribute(&alias, "rating").unwrap(),
        Some(TypedValue::Number(8.5))
    );

    let merged = store.attributes(&alias).unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged["genre"].as_str(), Some("thriller"));

    store.set_attribute(&alias, "rating", json!(6)).unwrap();
    assert_eq!(
        store.attribute(&alias, "rating").unwrap().and_then(|v| v.as_number()),
        Some(6.0)
    );
    assert_eq!(
        store.attribute(&original, "rating").unwrap().and_then(|v| v.as_number()),
        Some(8.5)
    );
}

#[test]
fn alias_chains_resolve_to_first_non_alias() {
    let conn = open_db_in_memory().unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let original = movie(&store);
    let first = alias_of(&store, &original, json!({"title": "Heat (copy)"}));
    let second = alias_of(&store, &first, json!({"title": "Heat (copy 2)"}));

    assert_eq!(second.title, "Heat (copy 2)");
    assert_eq!(store.original(&second).unwrap().map(|e| e.id), Some(original.id));
    assert_eq!(
        store.attribute(&second, "genre").unwrap().and_then(|v| v.as_str().map(String::from)),
        Some("crime".to_string())
    );
    assert_eq!(
        store.aliases(&original).unwrap().iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![first.id]
    );
}

#[test]
fn deleted_original_degrades_to_own_values() {
    let conn = open_db_in_memory().unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let original = movie(&store);
    let alias = alias_of(&store, &original, json!({"title": "Heat (kept)"}));

    store.soft_delete(original.id).unwrap();

    let resolved = store.get(alias.id).unwrap();
    assert_eq!(resolved.href, None);
    assert_eq!(resolved.title, "Heat (kept)");
    assert_eq!(store.original(&alias).unwrap(), None);
    assert_eq!(store.attribute(&alias, "rating").unwrap(), None);
    assert!(store.attributes(&alias).unwrap().is_empty());
}

#[test]
fn update_enforces_type_and_alias_rules() {
    let conn = open_db_in_memory().unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let original = movie(&store);
    let other = store
        .create(CreateEntity::new(payload(json!({"type": "book", "title": "Dune"}))))
        .unwrap();

    assert!(matches!(
        store.update(original.id, &payload(json!({"type": "book"})), false),
        Err(StoreError::Validation(EntityValidationError::ImmutableType { .. }))
    ));
    assert!(matches!(
        store.update(original.id, &payload(json!({"alias_id": original.id})), false),
        Err(StoreError::InvalidMode(_))
    ));
    assert!(matches!(
        store.update(original.id, &payload(json!({"alias_id": other.id})), false),
        Err(StoreError::Validation(EntityValidationError::AliasTypeMismatch { .. }))
    ));

    let updated = store
        .update(
            original.id,
            &payload(json!({"title": "Heat (1995)", "href": null, "genre": "heist"})),
            false,
        )
        .unwrap();
    assert_eq!(updated.title, "Heat (1995)");
    assert_eq!(updated.href, None);
    assert_eq!(updated.kind, "movie");
    assert_eq!(
        store.attribute(&updated, "genre").unwrap(),
        Some(TypedValue::String("heist".to_string()))
    );
}

#[test]
fn update_rejects_alias_targets_that_lead_back() {
    let conn = open_db_in_memory().unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let original = movie(&store);
    let first = alias_of(&store, &original, json!({"title": "Heat (first)"}));
    let second = alias_of(&store, &first, json!({"title": "Heat (second)"}));

    assert!(matches!(
        store.update(original.id, &payload(json!({"alias_id": second.id})), false),
        Err(StoreError::InvalidMode(_))
    ));
    assert!(matches!(
        store.update(first.id, &payload(json!({"alias_id": second.id})), false),
        Err(StoreError::InvalidMode(_))
    ));
    assert_eq!(store.get(original.id).unwrap().alias_id, None);

    let other = store
        .create(CreateEntity::new(payload(json!({"type": "movie", "title": "Ronin"}))))
        .unwrap();
    let moved = store
        .update(second.id, &payload(json!({"alias_id": other.id})), false)
        .unwrap();
    assert_eq!(moved.alias_id, Some(other.id));
}
