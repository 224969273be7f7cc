//! Placement tree use-case service.
//!
//! # Responsibility
//! - Answer parent and children queries, including alias-inherited children.
//! - Own the only mutation path of the tree: append (or move) a child.
//!
//! # Invariants
//! - `C` is in `P.children` iff `C.parent_id == P`; both sides are written in
//!   one transaction.
//! - Appending is idempotent and never creates a cycle.
//! - A parent/children mismatch is logged as corruption. The child reads as
//!   having no parent, and a parent does not list a child that points elsewhere.

use super::{StoreError, StoreResult};
use crate::db::with_write_transaction;
use crate::model::entity::{Entity, EntityId};
use crate::model::placement::{ChildrenMode, Placement};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::ensure_store_connection_ready;
use crate::repo::placement_repo::{PlacementRepository, SqlitePlacementRepository};
use log::{info, warn};
use rusqlite::Connection;
use std::collections::HashSet;

/// Parent/children manager over placement rows.
pub struct PlacementTree<'conn> {
    conn: &'conn Connection,
    entities: SqliteEntityRepository<'conn>,
    placements: SqlitePlacementRepository<'conn>,
}

impl<'conn> PlacementTree<'conn> {
    /// Creates the tree manager from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self::new(conn))
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            entities: SqliteEntityRepository::new(conn),
            placements: SqlitePlacementRepository::new(conn),
        }
    }

    /// Active placement row of `entity`.
    pub fn placement(&self, entity: &Entity) -> StoreResult<Option<Placement>> {
        Ok(self.placements.get(entity.id)?)
    }

    /// Active parent of `entity`, cross-checked against the parent's children.
    pub fn parent(&self, entity: &Entity) -> StoreResult<Option<Entity>> {
        let Some(parent_id) = self
            .placements
            .get(entity.id)?
            .and_then(|placement| placement.parent_id)
        else {
            return Ok(None);
        };
        let Some(parent) = self.entities.get(parent_id, false)? else {
            return Ok(None);
        };

        let listed = self
            .placements
            .get(parent_id)?
            .is_some_and(|placement| placement.contains_child(entity.id));
        if !listed {
            warn!(
                "event=placement_corruption module=service status=degraded entity_id={} parent_id={} reason=not_in_parent_children",
                entity.id, parent_id
            );
            return Ok(None);
        }

        Ok(Some(parent))
    }

    /// Children of `entity` for `mode`, in stored order.
    pub fn children(&self, entity: &Entity, mode: ChildrenMode) -> StoreResult<Vec<Entity>> {
        match mode {
            ChildrenMode::Current => self.current_children(entity.id),
            ChildrenMode::Original => {
                if !entity.is_alias() {
                    return Err(StoreError::InvalidMode(format!(
                        "entity {} is not an alias, original children are unavailable",
                        entity.id
                    )));
                }
                self.original_children(entity)
            }
            ChildrenMode::CurrentAndOriginal => {
                let mut children = self.current_children(entity.id)?;
                if entity.is_alias() {
                    let seen: HashSet<EntityId> = children.iter().map(|child| child.id).collect();
                    children.extend(
                        self.original_children(entity)?
                            .into_iter()
                            .filter(|child| !seen.contains(&child.id)),
                    );
                }
                Ok(children)
            }
        }
    }

    /// [`Self::children`] for a numeric mode code (`1`, `2` or `3`).
    pub fn children_by_code(&self, entity: &Entity, code: i64) -> StoreResult<Vec<Entity>> {
        let mode = ChildrenMode::from_code(code).ok_or_else(|| {
            StoreError::InvalidMode(format!("unknown children mode code {code}"))
        })?;
        self.children(entity, mode)
    }

    /// Places `child` under `parent`, detaching it from any previous parent.
    pub fn append_child(&self, parent: &Entity, child: &Entity) -> StoreResult<()> {
        if !parent.is_saved() || !child.is_saved() {
            return Err(StoreError::NotSaved);
        }

        with_write_transaction(self.conn, || {
            self.entities
                .get(parent.id, false)?
                .ok_or(StoreError::ParentNotFound(parent.id))?;
            self.entities
                .get(child.id, false)?
                .ok_or(StoreError::NotFound(child.id))?;
            if self.is_ancestor_or_self(child.id, parent.id)? {
                return Err(StoreError::CyclicPlacement {
                    parent: parent.id,
                    child: child.id,
                });
            }

            let mut parent_placement = self.ensure_placement(parent.id)?;
            let child_placement = self.ensure_placement(child.id)?;

            if let Some(previous_id) = child_placement.parent_id.filter(|id| *id != parent.id) {
                if let Some(mut previous) = self.placements.get(previous_id)? {
                    previous.children.retain(|id| *id != child.id);
                    self.placements.set_children(previous_id, &previous.children)?;
                }
            }
            if child_placement.parent_id != Some(parent.id) {
                self.placements.set_parent(child.id, Some(parent.id))?;
            }
            if !parent_placement.contains_child(child.id) {
                parent_placement.children.push(child.id);
                self.placements
                    .set_children(parent.id, &parent_placement.children)?;
            }
            Ok(())
        })?;

        info!(
            "event=placement_append module=service status=ok parent_id={} child_id={}",
            parent.id, child.id
        );
        Ok(())
    }

    /// Creates the placement of a new entity, under `parent` when given.
    pub(crate) fn place(&self, entity: &Entity, parent: Option<&Entity>) -> StoreResult<()> {
        self.placements.insert(entity.id, None)?;
        if let Some(parent) = parent {
            self.append_child(parent, entity)?;
        }
        Ok(())
    }

    /// Removes `entity` from its parent's children and retires its placement.
    ///
    /// Children of `entity` keep their placement; their parent reads as `None`
    /// once `entity` is deleted.
    pub(crate) fn detach(&self, entity: &Entity) -> StoreResult<()> {
        let Some(placement) = self.placements.get(entity.id)? else {
            return Ok(());
        };
        if let Some(parent_id) = placement.parent_id {
            if let Some(mut parent) = self.placements.get(parent_id)? {
                parent.children.retain(|id| *id != entity.id);
                self.placements.set_children(parent_id, &parent.children)?;
            }
        }
        self.placements.soft_delete(entity.id)?;
        Ok(())
    }

    fn current_children(&self, entity_id: EntityId) -> StoreResult<Vec<Entity>> {
        let Some(placement) = self.placements.get(entity_id)? else {
            return Ok(Vec::new());
        };
        let mut children = Vec::with_capacity(placement.children.len());
        for child_id in placement.children {
            let Some(child) = self.entities.get(child_id, false)? else {
                continue;
            };
            let points_back = self
                .placements
                .get(child_id)?
                .is_some_and(|child_placement| child_placement.parent_id == Some(entity_id));
            if !points_back {
                warn!(
                    "event=placement_corruption module=service status=degraded entity_id={} child_id={} reason=child_parent_mismatch",
                    entity_id, child_id
                );
                continue;
            }
            children.push(child);
        }
        Ok(children)
    }

    fn original_children(&self, alias: &Entity) -> StoreResult<Vec<Entity>> {
        let mut visited: HashSet<EntityId> = HashSet::from([alias.id]);
        let mut cursor = alias.alias_id;

        while let Some(current) = cursor {
            if !visited.insert(current) {
                warn!(
                    "event=placement_corruption module=service status=degraded entity_id={} reason=alias_cycle",
                    alias.id
                );
                return Ok(Vec::new());
            }
            let Some(original) = self.entities.get(current, false)? else {
                warn!(
                    "event=placement_children module=service status=degraded entity_id={} original_id={} reason=missing_original",
                    alias.id, current
                );
                return Ok(Vec::new());
            };
            if !original.is_alias() {
                return self.current_children(original.id);
            }
            cursor = original.alias_id;
        }

        Ok(Vec::new())
    }

    fn ensure_placement(&self, entity_id: EntityId) -> StoreResult<Placement> {
        match self.placements.get(entity_id)? {
            Some(placement) => Ok(placement),
            None => Ok(self.placements.insert(entity_id, None)?),
        }
    }

    // Walks up from `node` looking for `candidate`.
    fn is_ancestor_or_self(&self, candidate: EntityId, node: EntityId) -> StoreResult<bool> {
        let mut visited = HashSet::new();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == candidate {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Ok(false);
            }
            cursor = self
                .placements
                .get(current)?
                .and_then(|placement| placement.parent_id);
        }
        Ok(false)
    }
}
