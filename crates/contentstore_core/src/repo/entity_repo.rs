//! Entity row repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist and load the fixed core columns of entities.
//! - Serve entity lookups for reference codecs.
//!
//! # Invariants
//! - Soft-deleted rows are only returned when explicitly requested.
//! - `type` never changes after insert.

use super::{RepoError, RepoResult};
use crate::codec::{CodecError, CodecResult, EntityLookup};
use crate::db::now_epoch_ms;
use crate::model::entity::{CoreFields, Entity, EntityId};
use rusqlite::{params, Connection, Row};

pub(crate) const ENTITY_COLUMNS: &str = "e.id,
    e.type,
    e.title,
    e.href,
    e.alias_id,
    e.content,
    e.created_at,
    e.created_by,
    e.updated_at,
    e.updated_by,
    e.deleted_at";

/// Repository interface for entity rows.
pub trait EntityRepository {
    /// Inserts a new row and returns the stored entity.
    fn insert(&self, fields: &CoreFields) -> RepoResult<Entity>;
    fn get(&self, id: EntityId, include_deleted: bool) -> RepoResult<Option<Entity>>;
    /// Writes the mutable core columns of `entity` and bumps `updated_at`.
    fn update(&self, entity: &Entity) -> RepoResult<Entity>;
    fn soft_delete(&self, id: EntityId) -> RepoResult<()>;
    /// Distinct types of active entities, sorted.
    fn list_types(&self) -> RepoResult<Vec<String>>;
    /// Active entity count per type, sorted by type.
    fn count_by_type(&self) -> RepoResult<Vec<(String, i64)>>;
    /// Active non-alias entities of one type, by id.
    fn list_originals(&self, kind: &str) -> RepoResult<Vec<Entity>>;
    /// Active aliases pointing directly at `original_id`, by id.
    fn list_aliases(&self, original_id: EntityId) -> RepoResult<Vec<Entity>>;
}

/// SQLite-backed entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_entities(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> RepoResult<Vec<Entity>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row(row)?);
        }
        Ok(entities)
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn insert(&self, fields: &CoreFields) -> RepoResult<Entity> {
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO entities (
                created_at,
                updated_at,
                title,
                type,
                href,
                alias_id,
                updated_by,
                created_by,
                content
            ) VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                now,
                fields.title.as_str(),
                fields.kind.as_str(),
                fields.href.as_deref(),
                fields.alias_id,
                fields.updated_by,
                fields.created_by,
                fields.content.as_deref(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get(id, false)?
            .ok_or_else(|| RepoError::InvalidData(format!("inserted entity {id} is not readable")))
    }

    fn get(&self, id: EntityId, include_deleted: bool) -> RepoResult<Option<Entity>> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS}
             FROM entities e
             WHERE e.id = ?1
               AND (?2 = 1 OR e.deleted_at IS NULL);"
        );
        Ok(self
            .query_entities(&sql, params![id, i64::from(include_deleted)])?
            .into_iter()
            .next())
    }

    fn update(&self, entity: &Entity) -> RepoResult<Entity> {
        let changed = self.conn.execute(
            "UPDATE entities
             SET
                title = ?1,
                href = ?2,
                alias_id = ?3,
                content = ?4,
                updated_by = ?5,
                updated_at = ?6
             WHERE id = ?7
               AND deleted_at IS NULL;",
            params![
                entity.title.as_str(),
                entity.href.as_deref(),
                entity.alias_id,
                entity.content.as_deref(),
                entity.updated_by,
                now_epoch_ms(),
                entity.id,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(entity.id));
        }

        self.get(entity.id, false)?
            .ok_or(RepoError::NotFound(entity.id))
    }

    fn soft_delete(&self, id: EntityId) -> RepoResult<()> {
        let now = now_epoch_ms();
        let changed = self.conn.execute(
            "UPDATE entities
             SET
                deleted_at = ?1,
                updated_at = ?1
             WHERE id = ?2
               AND deleted_at IS NULL;",
            params![now, id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn list_types(&self) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT type
             FROM entities
             WHERE deleted_at IS NULL
             ORDER BY type ASC;",
        )?;
        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    fn count_by_type(&self) -> RepoResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, COUNT(*)
             FROM entities
             WHERE deleted_at IS NULL
             GROUP BY type
             ORDER BY type ASC;",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    fn list_originals(&self, kind: &str) -> RepoResult<Vec<Entity>> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS}
             FROM entities e
             WHERE e.type = ?1
               AND e.alias_id IS NULL
               AND e.deleted_at IS NULL
             ORDER BY e.id ASC;"
        );
        self.query_entities(&sql, [kind])
    }

    fn list_aliases(&self, original_id: EntityId) -> RepoResult<Vec<Entity>> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS}
             FROM entities e
             WHERE e.alias_id = ?1
               AND e.deleted_at IS NULL
             ORDER BY e.id ASC;"
        );
        self.query_entities(&sql, [original_id])
    }
}

impl EntityLookup for SqliteEntityRepository<'_> {
    fn find_entity(&self, id: EntityId) -> CodecResult<Option<Entity>> {
        self.get(id, false)
            .map_err(|err| CodecError::Lookup(err.to_string()))
    }
}

/// Maps one row selected with [`ENTITY_COLUMNS`].
pub(crate) fn parse_entity_row(row: &Row<'_>) -> RepoResult<Entity> {
    let id: EntityId = row.get(0)?;
    let kind: String = row.get(1)?;
    if kind.trim().is_empty() {
        return Err(RepoError::InvalidData(format!(
            "entity {id} has an empty type in entities.type"
        )));
    }

    Ok(Entity {
        id,
        kind,
        title: row.get(2)?,
        href: row.get(3)?,
        alias_id: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        created_by: row.get(7)?,
        updated_at: row.get(8)?,
        updated_by: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::{EntityRepository, SqliteEntityRepository};
    use crate::codec::EntityLookup;
    use crate::db::open_db_in_memory;
    use crate::model::entity::CoreFields;
    use crate::repo::RepoError;

    fn fields(kind: &str, title: &str) -> CoreFields {
        CoreFields {
            kind: kind.to_string(),
            title: title.to_string(),
            ..CoreFields::default()
        }
    }

    #[test]
    fn insert_then_get_roundtrips_core_columns() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(&conn);
        let mut input = fields("page", "Home");
        input.href = Some("/".to_string());
        input.created_by = Some(3);

        let stored = repo.insert(&input).unwrap();
        assert!(stored.id > 0);
        assert_eq!(stored.kind, "page");
        assert_eq!(stored.href.as_deref(), Some("/"));
        assert_eq!(stored.created_by, Some(3));
        assert_eq!(stored.created_at, stored.updated_at);
        assert_eq!(repo.get(stored.id, false).unwrap(), Some(stored));
    }

    #[test]
    fn soft_deleted_rows_are_hidden_by_default() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(&conn);
        let stored = repo.insert(&fields("page", "Gone")).unwrap();

        repo.soft_delete(stored.id).unwrap();
        assert_eq!(repo.get(stored.id, false).unwrap(), None);
        assert!(repo.get(stored.id, true).unwrap().unwrap().deleted_at.is_some());
        assert_eq!(repo.find_entity(stored.id).unwrap(), None);
        assert!(matches!(
            repo.soft_delete(stored.id),
            Err(RepoError::NotFound(id)) if id == stored.id
        ));
    }

    #[test]
    fn listing_separates_types_originals_and_aliases() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(&conn);
        let original = repo.insert(&fields("page", "A")).unwrap();
        let mut alias_fields = fields("page", "A alias");
        alias_fields.alias_id = Some(original.id);
        let alias = repo.insert(&alias_fields).unwrap();
        repo.insert(&fields("site", "S")).unwrap();

        assert_eq!(repo.list_types().unwrap(), vec!["page", "site"]);
        assert_eq!(
            repo.count_by_type().unwrap(),
            vec![("page".to_string(), 2), ("site".to_string(), 1)]
        );
        assert_eq!(repo.list_originals("page").unwrap(), vec![original.clone()]);
        assert_eq!(repo.list_aliases(original.id).unwrap(), vec![alias]);
    }

    #[test]
    fn update_writes_mutable_columns() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(&conn);
        let mut entity = repo.insert(&fields("page", "Draft")).unwrap();
        entity.title = "Final".to_string();
        entity.content = Some("body".to_string());

        let updated = repo.update(&entity).unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.content.as_deref(), Some("body"));
        assert!(updated.updated_at >= entity.updated_at);
    }
}
