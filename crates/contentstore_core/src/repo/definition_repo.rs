//! Attribute definition registry backed by SQLite.
//!
//! # Responsibility
//! - Answer which attributes a model type declares, and which are required.
//! - Register definitions in bulk, keeping or overwriting existing rows.
//! - Cache definitions per model type for the lifetime of the registry.
//!
//! # Invariants
//! - At most one non-deleted definition exists per `(name, model_type)`.
//! - Overwriting a definition preserves its id.
//! - A bulk call is validated as a whole before the first write.

use super::{RepoError, RepoResult};
use crate::codec::{CodecError, CodecRegistry};
use crate::db::{now_epoch_ms, with_write_transaction};
use crate::model::attribute::{AttributeDefinition, DefinitionId, NewAttributeDefinition};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const DEFINITION_SELECT_SQL: &str = "SELECT
    id,
    name,
    type,
    title,
    description,
    model_type,
    required,
    created_at,
    updated_at,
    deleted_at
FROM attribute_definitions";

/// Definitions of one model type, keyed by name.
pub type DefinitionMap = BTreeMap<String, AttributeDefinition>;

/// Registry interface for attribute definitions.
pub trait DefinitionRegistry {
    /// Active definition of `name` for `model_type`.
    fn get(&self, name: &str, model_type: &str) -> RepoResult<Option<AttributeDefinition>>;
    /// Active definitions flagged required for `model_type`, by name.
    fn get_required(&self, model_type: &str) -> RepoResult<Vec<AttributeDefinition>>;
    /// All active definitions of `model_type`; `force_reload` refreshes the cache.
    fn definitions(&self, model_type: &str, force_reload: bool) -> RepoResult<DefinitionMap>;
    /// Registers candidates for `model_type`, in input order.
    fn bulk_create(
        &self,
        definitions: &[NewAttributeDefinition],
        model_type: &str,
        override_existing: bool,
    ) -> RepoResult<Vec<AttributeDefinition>>;
    /// Soft-deletes the active definition; returns whether one existed.
    fn soft_delete(&self, name: &str, model_type: &str) -> RepoResult<bool>;
    /// Drops cached definitions of `model_type`.
    fn invalidate(&self, model_type: &str);
}

/// SQLite-backed definition registry with a per-model-type cache.
pub struct SqliteDefinitionRegistry<'conn> {
    conn: &'conn Connection,
    codecs: Arc<CodecRegistry>,
    cache: RefCell<HashMap<String, DefinitionMap>>,
}

impl<'conn> SqliteDefinitionRegistry<'conn> {
    pub fn new(conn: &'conn Connection, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            conn,
            codecs,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Loads a definition by id, deleted rows included.
    pub fn get_by_id(&self, id: DefinitionId) -> RepoResult<Option<AttributeDefinition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DEFINITION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_definition_row(row)?));
        }
        Ok(None)
    }

    fn load(&self, model_type: &str) -> RepoResult<DefinitionMap> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE model_type = ?1
               AND deleted_at IS NULL
             ORDER BY name ASC;"
        ))?;
        let mut rows = stmt.query([model_type])?;
        let mut definitions = DefinitionMap::new();
        while let Some(row) = rows.next()? {
            let definition = parse_definition_row(row)?;
            definitions.insert(definition.name.clone(), definition);
        }
        Ok(definitions)
    }

    fn find_active(&self, name: &str, model_type: &str) -> RepoResult<Option<AttributeDefinition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE name = ?1
               AND model_type = ?2
               AND deleted_at IS NULL;"
        ))?;
        stmt.query_row(params![name, model_type], |row| Ok(parse_definition_row(row)))
            .optional()?
            .transpose()
    }

    fn validate_candidates(&self, definitions: &[NewAttributeDefinition]) -> RepoResult<()> {
        for candidate in definitions {
            candidate.validate()?;
            if !self.codecs.supports(&candidate.kind) {
                return Err(RepoError::Codec(CodecError::UnknownCodec(
                    candidate.kind.clone(),
                )));
            }
        }
        Ok(())
    }

    fn write_candidate(
        &self,
        candidate: &NewAttributeDefinition,
        model_type: &str,
        override_existing: bool,
    ) -> RepoResult<AttributeDefinition> {
        let now = now_epoch_ms();
        match self.find_active(&candidate.name, model_type)? {
            Some(existing) if !override_existing => Ok(existing),
            Some(existing) => {
                self.conn.execute(
                    "UPDATE attribute_definitions
                     SET
                        title = ?1,
                        type = ?2,
                        description = ?3,
                        required = ?4,
                        updated_at = ?5
                     WHERE id = ?6;",
                    params![
                        candidate.title.as_str(),
                        candidate.kind.as_str(),
                        candidate.description.as_deref(),
                        i64::from(candidate.required),
                        now,
                        existing.id,
                    ],
                )?;
                self.get_by_id(existing.id)?
                    .ok_or_else(|| missing_after_write(&candidate.name, model_type))
            }
            None => {
                self.conn.execute(
                    "INSERT INTO attribute_definitions (
                        created_at,
                        updated_at,
                        title,
                        name,
                        type,
                        description,
                        model_type,
                        required
                    ) VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                    params![
                        now,
                        candidate.title.as_str(),
                        candidate.name.as_str(),
                        candidate.kind.as_str(),
                        candidate.description.as_deref(),
                        model_type,
                        i64::from(candidate.required),
                    ],
                )?;
                self.get_by_id(self.conn.last_insert_rowid())?
                    .ok_or_else(|| missing_after_write(&candidate.name, model_type))
            }
        }
    }
}

impl DefinitionRegistry for SqliteDefinitionRegistry<'_> {
    fn get(&self, name: &str, model_type: &str) -> RepoResult<Option<AttributeDefinition>> {
        Ok(self.definitions(model_type, false)?.remove(name))
    }

    fn get_required(&self, model_type: &str) -> RepoResult<Vec<AttributeDefinition>> {
        Ok(self
            .definitions(model_type, false)?
            .into_values()
            .filter(|definition| definition.required)
            .collect())
    }

    fn definitions(&self, model_type: &str, force_reload: bool) -> RepoResult<DefinitionMap> {
        if !force_reload {
            if let Some(cached) = self.cache.borrow().get(model_type) {
                return Ok(cached.clone());
            }
        }

        let loaded = self.load(model_type)?;
        self.cache
            .borrow_mut()
            .insert(model_type.to_string(), loaded.clone());
        Ok(loaded)
    }

    fn bulk_create(
        &self,
        definitions: &[NewAttributeDefinition],
        model_type: &str,
        override_existing: bool,
    ) -> RepoResult<Vec<AttributeDefinition>> {
        self.validate_candidates(definitions)?;
        if definitions.is_empty() {
            return Ok(Vec::new());
        }

        let result = with_write_transaction(self.conn, || {
            definitions
                .iter()
                .map(|candidate| self.write_candidate(candidate, model_type, override_existing))
                .collect::<RepoResult<Vec<_>>>()
        });
        self.invalidate(model_type);

        let stored = result?;
        info!(
            "event=definitions_register module=repo status=ok model_type={} count={} override={}",
            model_type,
            stored.len(),
            override_existing
        );
        Ok(stored)
    }

    fn soft_delete(&self, name: &str, model_type: &str) -> RepoResult<bool> {
        let now = now_epoch_ms();
        let changed = self.conn.execute(
            "UPDATE attribute_definitions
             SET
                deleted_at = ?1,
                updated_at = ?1
             WHERE name = ?2
               AND model_type = ?3
               AND deleted_at IS NULL;",
            params![now, name, model_type],
        )?;
        self.invalidate(model_type);
        Ok(changed > 0)
    }

    fn invalidate(&self, model_type: &str) {
        self.cache.borrow_mut().remove(model_type);
    }
}

fn missing_after_write(name: &str, model_type: &str) -> RepoError {
    RepoError::InvalidData(format!(
        "definition `{model_type}.{name}` is not readable after write"
    ))
}

fn parse_definition_row(row: &Row<'_>) -> RepoResult<AttributeDefinition> {
    let required = match row.get::<_, i64>("required")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid required value `{other}` in attribute_definitions.required"
            )));
        }
    };

    Ok(AttributeDefinition {
        id: row.get("id")?,
        name: row.get("name")?,
        kind: row.get("type")?,
        title: row.get("title")?,
        description: row.get("description")?,
        model_type: row.get("model_type")?,
        required,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{DefinitionRegistry, SqliteDefinitionRegistry};
    use crate::codec::{CodecError, CodecRegistry};
    use crate::db::open_db_in_memory;
    use crate::model::attribute::{DefinitionValidationError, NewAttributeDefinition};
    use crate::repo::RepoError;
    use std::sync::Arc;

    fn registry(conn: &rusqlite::Connection) -> SqliteDefinitionRegistry<'_> {
        SqliteDefinitionRegistry::new(conn, Arc::new(CodecRegistry::builtin()))
    }

    #[test]
    fn cached_lookups_need_force_reload_to_see_external_writes() {
        let conn = open_db_in_memory().unwrap();
        let registry = registry(&conn);
        assert!(registry.definitions("product", false).unwrap().is_empty());

        conn.execute(
            "INSERT INTO attribute_definitions (title, name, type, model_type)
             VALUES ('Color', 'color', 'string', 'product');",
            [],
        )
        .unwrap();

        assert_eq!(registry.get("color", "product").unwrap(), None);
        let reloaded = registry.definitions("product", true).unwrap();
        assert!(reloaded.contains_key("color"));
        assert!(registry.get("color", "product").unwrap().is_some());
    }

    #[test]
    fn invalid_candidates_abort_the_whole_batch() {
        let conn = open_db_in_memory().unwrap();
        let registry = registry(&conn);

        let err = registry
            .bulk_create(
                &[
                    NewAttributeDefinition::new("color", "string"),
                    NewAttributeDefinition::new("title", "string"),
                ],
                "product",
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::InvalidDefinition(DefinitionValidationError::ReservedName(_))
        ));

        let err = registry
            .bulk_create(
                &[NewAttributeDefinition::new("shape", "polygon")],
                "product",
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::Codec(CodecError::UnknownCodec(kind)) if kind == "polygon"
        ));
        assert!(registry.definitions("product", true).unwrap().is_empty());
    }

    #[test]
    fn soft_delete_frees_the_name_for_a_new_definition() {
        let conn = open_db_in_memory().unwrap();
        let registry = registry(&conn);
        let first = registry
            .bulk_create(&[NewAttributeDefinition::new("size", "number")], "product", false)
            .unwrap();

        assert!(registry.soft_delete("size", "product").unwrap());
        assert!(!registry.soft_delete("size", "product").unwrap());
        assert_eq!(registry.get("size", "product").unwrap(), None);

        let second = registry
            .bulk_create(&[NewAttributeDefinition::new("size", "string")], "product", false)
            .unwrap();
        assert_ne!(first[0].id, second[0].id);
        assert_eq!(registry.get_by_id(first[0].id).unwrap().unwrap().kind, "number");
    }
}
