//! Attribute value store backed by SQLite.
//!
//! # Responsibility
//! - Read typed attribute values of one entity through its definitions.
//! - Validate and upsert attribute values, singly or in batches.
//!
//! # Invariants
//! - Writes require a persisted, typed entity.
//! - A value is only written for a definition of the entity's own type.
//! - At most one row per `(entity_id, attribute_definition_id)`; the last
//!   write wins.
//! - Batch writes attempt every key before reporting collected failures.

use super::definition_repo::{DefinitionRegistry, SqliteDefinitionRegistry};
use super::entity_repo::SqliteEntityRepository;
use super::{RepoError, RepoResult};
use crate::codec::{CodecError, CodecRegistry};
use crate::db::now_epoch_ms;
use crate::model::attribute::{AttributeDefinition, AttributeValue};
use crate::model::entity::{Entity, Values};
use crate::model::value::TypedValue;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

const VALUE_SELECT_SQL: &str = "SELECT
    id,
    entity_id,
    attribute_definition_id,
    value,
    created_at,
    updated_at
FROM attribute_values";

/// Input accepted by attribute writes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInput {
    /// Plain value, encoded by the definition's codec.
    Value(JsonValue),
    /// Raw text copied from another stored value of the same codec kind.
    Copy(AttributeValue),
}

impl From<JsonValue> for AttributeInput {
    fn from(value: JsonValue) -> Self {
        Self::Value(value)
    }
}

impl From<AttributeValue> for AttributeInput {
    fn from(value: AttributeValue) -> Self {
        Self::Copy(value)
    }
}

/// Typed attribute reads and writes for entities.
pub struct SqliteValueStore<'conn> {
    conn: &'conn Connection,
    registry: SqliteDefinitionRegistry<'conn>,
    codecs: Arc<CodecRegistry>,
}

impl<'conn> SqliteValueStore<'conn> {
    pub fn new(conn: &'conn Connection, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            conn,
            registry: SqliteDefinitionRegistry::new(conn, Arc::clone(&codecs)),
            codecs,
        }
    }

    pub fn registry(&self) -> &SqliteDefinitionRegistry<'conn> {
        &self.registry
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Typed value of `name` on `entity`.
    ///
    /// Returns `None` for unsaved entities, undefined attributes, absent rows
    /// and empty raw values.
    pub fn get(&self, entity: &Entity, name: &str) -> RepoResult<Option<TypedValue>> {
        if !entity.is_saved() {
            return Ok(None);
        }
        let Some(definition) = self.registry.get(name, &entity.kind)? else {
            return Ok(None);
        };
        match self.load_record(entity, &definition)? {
            Some(record) => self.decode(&definition, &record.raw_value),
            None => Ok(None),
        }
    }

    /// Stored row of `name` on `entity`, if any.
    pub fn get_record(&self, entity: &Entity, name: &str) -> RepoResult<Option<AttributeValue>> {
        if !entity.is_saved() {
            return Ok(None);
        }
        match self.registry.get(name, &entity.kind)? {
            Some(definition) => self.load_record(entity, &definition),
            None => Ok(None),
        }
    }

    /// Every non-null typed value of `entity`, keyed by attribute name.
    pub fn values(&self, entity: &Entity) -> RepoResult<BTreeMap<String, TypedValue>> {
        let mut values = BTreeMap::new();
        if !entity.is_saved() {
            return Ok(values);
        }

        let definitions = self.registry.definitions(&entity.kind, false)?;
        let by_id: BTreeMap<i64, &AttributeDefinition> = definitions
            .values()
            .map(|definition| (definition.id, definition))
            .collect();

        let mut stmt = self.conn.prepare(&format!(
            "{VALUE_SELECT_SQL}
             WHERE entity_id = ?1
             ORDER BY attribute_definition_id ASC;"
        ))?;
        let mut rows = stmt.query([entity.id])?;
        while let Some(row) = rows.next()? {
            let record = parse_value_row(row)?;
            let Some(definition) = by_id.get(&record.attribute_definition_id) else {
                continue;
            };
            if let Some(value) = self.decode(definition, &record.raw_value)? {
                values.insert(definition.name.clone(), value);
            }
        }

        Ok(values)
    }

    /// Validates and upserts one attribute value.
    pub fn set(
        &self,
        entity: &Entity,
        name: &str,
        input: impl Into<AttributeInput>,
    ) -> RepoResult<AttributeValue> {
        if !entity.is_saved() {
            return Err(RepoError::NotSaved);
        }
        let definition =
            self.registry
                .get(name, &entity.kind)?
                .ok_or_else(|| RepoError::UnknownAttribute {
                    name: name.to_string(),
                    model_type: entity.kind.clone(),
                })?;

        let raw_value = match input.into() {
            AttributeInput::Value(value) => self
                .codecs
                .serialize(&definition.kind, &value)
                .map_err(|source| mismatch_or_codec(name, source))?,
            AttributeInput::Copy(other) => self.copied_raw_value(name, &definition, other)?,
        };

        self.upsert(entity, &definition, &raw_value)
    }

    /// Applies [`Self::set`] to every key, then reports collected failures.
    ///
    /// Unknown attributes are skipped when `ignore_unknown` is set. Type
    /// mismatches are always collected. Keys that succeed stay written.
    pub fn set_many(&self, entity: &Entity, values: &Values, ignore_unknown: bool) -> RepoResult<()> {
        if !entity.is_saved() {
            return Err(RepoError::NotSaved);
        }

        let mut failures = Vec::new();
        for (name, value) in values {
            match self.set(entity, name, value.clone()) {
                Ok(_) => {}
                Err(RepoError::UnknownAttribute { .. }) if ignore_unknown => {
                    debug!(
                        "event=attribute_skip module=repo status=ignored entity_id={} name={}",
                        entity.id, name
                    );
                }
                Err(
                    err @ (RepoError::UnknownAttribute { .. } | RepoError::TypeMismatch { .. }),
                ) => failures.push(err),
                Err(err) => return Err(err),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RepoError::Attributes(failures))
        }
    }

    fn copied_raw_value(
        &self,
        name: &str,
        definition: &AttributeDefinition,
        other: AttributeValue,
    ) -> RepoResult<String> {
        let source_kind = self
            .registry
            .get_by_id(other.attribute_definition_id)?
            .map(|source| source.kind);
        if source_kind.as_deref() != Some(definition.kind.as_str()) {
            return Err(RepoError::TypeMismatch {
                name: name.to_string(),
                source: CodecError::TypeMismatch {
                    expected: "attribute value of the same type",
                    found: "attribute value of another type",
                },
            });
        }
        Ok(other.raw_value)
    }

    fn upsert(
        &self,
        entity: &Entity,
        definition: &AttributeDefinition,
        raw_value: &str,
    ) -> RepoResult<AttributeValue> {
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO attribute_values (
                created_at,
                updated_at,
                value,
                entity_id,
                attribute_definition_id
            ) VALUES (?1, ?1, ?2, ?3, ?4)
            ON CONFLICT (entity_id, attribute_definition_id) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![now, raw_value, entity.id, definition.id],
        )?;

        self.load_record(entity, definition)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "attribute `{}` of entity {} is not readable after write",
                definition.unique_name(),
                entity.id
            ))
        })
    }

    fn load_record(
        &self,
        entity: &Entity,
        definition: &AttributeDefinition,
    ) -> RepoResult<Option<AttributeValue>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VALUE_SELECT_SQL}
             WHERE entity_id = ?1
               AND attribute_definition_id = ?2;"
        ))?;
        stmt.query_row(params![entity.id, definition.id], |row| {
            Ok(parse_value_row(row))
        })
        .optional()?
        .transpose()
    }

    fn decode(
        &self,
        definition: &AttributeDefinition,
        raw_value: &str,
    ) -> RepoResult<Option<TypedValue>> {
        let lookup = SqliteEntityRepository::new(self.conn);
        Ok(self
            .codecs
            .deserialize(&definition.kind, raw_value, &lookup)?)
    }
}

// Unknown kinds are a definition problem, not a bad input value.
fn mismatch_or_codec(name: &str, source: CodecError) -> RepoError {
    match source {
        CodecError::TypeMismatch { .. } => RepoError::TypeMismatch {
            name: name.to_string(),
            source,
        },
        other => RepoError::Codec(other),
    }
}

fn parse_value_row(row: &Row<'_>) -> RepoResult<AttributeValue> {
    Ok(AttributeValue {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        attribute_definition_id: row.get("attribute_definition_id")?,
        raw_value: row.get("value")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{AttributeInput, SqliteValueStore};
    use crate::codec::CodecRegistry;
    use crate::db::open_db_in_memory;
    use crate::model::attribute::NewAttributeDefinition;
    use crate::model::entity::{CoreFields, Entity, Values};
    use crate::model::value::TypedValue;
    use crate::repo::definition_repo::DefinitionRegistry;
    use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
    use crate::repo::RepoError;
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::Arc;

    fn saved(conn: &Connection, kind: &str) -> Entity {
        SqliteEntityRepository::new(conn)
            .insert(&CoreFields {
                kind: kind.to_string(),
                title: "Item".to_string(),
                ..CoreFields::default()
            })
            .unwrap()
    }

    fn store(conn: &Connection) -> SqliteValueStore<'_> {
        let store = SqliteValueStore::new(conn, Arc::new(CodecRegistry::builtin()));
        store
            .registry()
            .bulk_create(
                &[
                    NewAttributeDefinition::new("price", "number"),
                    NewAttributeDefinition::new("color", "string"),
                    NewAttributeDefinition::new("cost", "number"),
                    NewAttributeDefinition::new("label", "string"),
                ],
                "product",
                false,
            )
            .unwrap();
        store
    }

    #[test]
    fn unsaved_entity_cannot_be_written() {
        let conn = open_db_in_memory().unwrap();
        let store = store(&conn);
        let draft = Entity::unsaved("product", "Draft");
        assert!(matches!(
            store.set(&draft, "price", json!(1)),
            Err(RepoError::NotSaved)
        ));
        assert_eq!(store.get(&draft, "price").unwrap(), None);
    }

    #[test]
    fn set_upserts_one_row_per_attribute() {
        let conn = open_db_in_memory().unwrap();
        let store = store(&conn);
        let item = saved(&conn, "product");

        let first = store.set(&item, "price", json!(10)).unwrap();
        let second = store.set(&item, "price", json!("12.5")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.raw_value, "12.5");
        assert_eq!(store.get(&item, "price").unwrap(), Some(TypedValue::Number(12.5)));

        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM attribute_values WHERE entity_id = ?1;",
                [item.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn copy_requires_same_codec_kind() {
        let conn = open_db_in_memory().unwrap();
        let store = store(&conn);
        let item = saved(&conn, "product");
        let price = store.set(&item, "price", json!(3)).unwrap();
        let color = store.set(&item, "color", json!("red")).unwrap();

        store
            .set(&item, "cost", AttributeInput::Copy(price.clone()))
            .unwrap();
        assert_eq!(store.get(&item, "cost").unwrap(), Some(TypedValue::Number(3.0)));
        assert!(matches!(
            store.set(&item, "cost", color),
            Err(RepoError::TypeMismatch { name, .. }) if name == "cost"
        ));

        let color = store.get_record(&item, "color").unwrap().unwrap();
        store.set(&item, "label", color).unwrap();
        assert_eq!(
            store.get(&item, "label").unwrap(),
            Some(TypedValue::String("red".to_string()))
        );
    }

    #[test]
    fn set_many_persists_valid_keys_and_aggregates_failures() {
        let conn = open_db_in_memory().unwrap();
        let store = store(&conn);
        let item = saved(&conn, "product");
        let values: Values = [
            ("color".to_string(), json!("blue")),
            ("price".to_string(), json!("cheap")),
            ("weight".to_string(), json!(3)),
        ]
        .into_iter()
        .collect();

        let err = store.set_many(&item, &values, false).unwrap_err();
        let failures = match err {
            RepoError::Attributes(failures) => failures,
            other => panic!("expected aggregate error, got {other:?}"),
        };
        assert_eq!(failures.len(), 2);
        assert!(matches!(&failures[0], RepoError::TypeMismatch { name, .. } if name == "price"));
        assert!(matches!(&failures[1], RepoError::UnknownAttribute { name, .. } if name == "weight"));
        assert_eq!(
            store.get(&item, "color").unwrap(),
            Some(TypedValue::String("blue".to_string()))
        );

        let err = store.set_many(&item, &values, true).unwrap_err();
        assert!(matches!(err, RepoError::Attributes(failures) if failures.len() == 1));
    }

    #[test]
    fn values_skips_nulls_and_other_types() {
        let conn = open_db_in_memory().unwrap();
        let store = store(&conn);
        let item = saved(&conn, "product");
        store.set(&item, "color", json!(null)).unwrap();
        store.set(&item, "price", json!(7)).unwrap();

        let values = store.values(&item).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("price"), Some(&TypedValue::Number(7.0)));

        let other = saved(&conn, "site");
        assert!(matches!(
            store.set(&other, "price", json!(1)),
            Err(RepoError::UnknownAttribute { model_type, .. }) if model_type == "site"
        ));
    }
}
