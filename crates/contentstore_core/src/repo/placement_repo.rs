//! Placement row repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist each entity's parent pointer and ordered children list.
//!
//! # Invariants
//! - At most one placement row exists per entity.
//! - `children` is stored as a JSON array of entity ids.
//! - Only active (`deleted_at IS NULL`) rows are returned.

use super::{RepoError, RepoResult};
use crate::db::now_epoch_ms;
use crate::model::entity::EntityId;
use crate::model::placement::Placement;
use rusqlite::{params, Connection, OptionalExtension, Row};

const PLACEMENT_SELECT_SQL: &str = "SELECT
    id,
    entity_id,
    parent_id,
    children,
    created_at,
    updated_at,
    deleted_at
FROM placements";

/// Repository interface for placement rows.
pub trait PlacementRepository {
    /// Creates the placement of `entity_id` with no children.
    fn insert(&self, entity_id: EntityId, parent_id: Option<EntityId>) -> RepoResult<Placement>;
    fn get(&self, entity_id: EntityId) -> RepoResult<Option<Placement>>;
    fn set_parent(&self, entity_id: EntityId, parent_id: Option<EntityId>) -> RepoResult<()>;
    fn set_children(&self, entity_id: EntityId, children: &[EntityId]) -> RepoResult<()>;
    fn soft_delete(&self, entity_id: EntityId) -> RepoResult<()>;
}

/// SQLite-backed placement repository.
pub struct SqlitePlacementRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePlacementRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn require_changed(changed: usize, entity_id: EntityId) -> RepoResult<()> {
        if changed == 0 {
            return Err(RepoError::NotFound(entity_id));
        }
        Ok(())
    }
}

impl PlacementRepository for SqlitePlacementRepository<'_> {
    fn insert(&self, entity_id: EntityId, parent_id: Option<EntityId>) -> RepoResult<Placement> {
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO placements (
                created_at,
                updated_at,
                entity_id,
                parent_id,
                children
            ) VALUES (?1, ?1, ?2, ?3, '[]');",
            params![now, entity_id, parent_id],
        )?;

        self.get(entity_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "placement of entity {entity_id} is not readable after insert"
            ))
        })
    }

    fn get(&self, entity_id: EntityId) -> RepoResult<Option<Placement>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PLACEMENT_SELECT_SQL}
             WHERE entity_id = ?1
               AND deleted_at IS NULL;"
        ))?;
        stmt.query_row([entity_id], |row| Ok(parse_placement_row(row)))
            .optional()?
            .transpose()
    }

    fn set_parent(&self, entity_id: EntityId, parent_id: Option<EntityId>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE placements
             SET
                parent_id = ?1,
                updated_at = ?2
             WHERE entity_id = ?3
               AND deleted_at IS NULL;",
            params![parent_id, now_epoch_ms(), entity_id],
        )?;
        Self::require_changed(changed, entity_id)
    }

    fn set_children(&self, entity_id: EntityId, children: &[EntityId]) -> RepoResult<()> {
        let encoded = serde_json::to_string(children).map_err(|err| {
            RepoError::InvalidData(format!("cannot encode children of {entity_id}: {err}"))
        })?;
        let changed = self.conn.execute(
            "UPDATE placements
             SET
                children = ?1,
                updated_at = ?2
             WHERE entity_id = ?3
               AND deleted_at IS NULL;",
            params![encoded, now_epoch_ms(), entity_id],
        )?;
        Self::require_changed(changed, entity_id)
    }

    fn soft_delete(&self, entity_id: EntityId) -> RepoResult<()> {
        let now = now_epoch_ms();
        self.conn.execute(
            "UPDATE placements
             SET
                deleted_at = ?1,
                updated_at = ?1
             WHERE entity_id = ?2
               AND deleted_at IS NULL;",
            params![now, entity_id],
        )?;
        Ok(())
    }
}

fn parse_placement_row(row: &Row<'_>) -> RepoResult<Placement> {
    let entity_id: EntityId = row.get("entity_id")?;
    let children_text: String = row.get("children")?;
    let children = serde_json::from_str::<Vec<EntityId>>(&children_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid children list `{children_text}` in placements.children of entity {entity_id}"
        ))
    })?;

    Ok(Placement {
        id: row.get("id")?,
        entity_id,
        parent_id: row.get("parent_id")?,
        children,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{PlacementRepository, SqlitePlacementRepository};
    use crate::db::open_db_in_memory;
    use crate::model::entity::CoreFields;
    use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
    use crate::repo::RepoError;

    #[test]
    fn children_roundtrip_as_ordered_json_list() {
        let conn = open_db_in_memory().unwrap();
        let entities = SqliteEntityRepository::new(&conn);
        let fields = CoreFields {
            kind: "folder".to_string(),
            title: "Root".to_string(),
            ..CoreFields::default()
        };
        let root = entities.insert(&fields).unwrap();
        let placements = SqlitePlacementRepository::new(&conn);

        let placement = placements.insert(root.id, None).unwrap();
        assert!(placement.children.is_empty());
        assert_eq!(placement.parent_id, None);

        placements.set_children(root.id, &[9, 4, 7]).unwrap();
        assert_eq!(placements.get(root.id).unwrap().unwrap().children, vec![9, 4, 7]);

        placements.soft_delete(root.id).unwrap();
        assert_eq!(placements.get(root.id).unwrap(), None);
        assert!(matches!(
            placements.set_parent(root.id, None),
            Err(RepoError::NotFound(id)) if id == root.id
        ));
    }

    #[test]
    fn malformed_children_are_reported() {
        let conn = open_db_in_memory().unwrap();
        let entities = SqliteEntityRepository::new(&conn);
        let root = entities
            .insert(&CoreFields {
                kind: "folder".to_string(),
                title: "Root".to_string(),
                ..CoreFields::default()
            })
            .unwrap();
        conn.execute(
            "INSERT INTO placements (entity_id, children) VALUES (?1, 'not json');",
            [root.id],
        )
        .unwrap();

        assert!(matches!(
            SqlitePlacementRepository::new(&conn).get(root.id),
            Err(RepoError::InvalidData(_))
        ));
    }
}
