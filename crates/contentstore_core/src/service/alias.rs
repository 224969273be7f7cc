//! Read-time alias resolution.
//!
//! # Responsibility
//! - Find the original behind an alias, following alias chains.
//! - Fill an alias's unset core fields and attributes from its original.
//!
//! # Invariants
//! - Substitution happens on every read and is never persisted.
//! - A missing, soft-deleted or cyclic original degrades to the alias's own
//!   values.

use crate::model::entity::{Entity, EntityId};
use crate::model::value::TypedValue;
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::value_repo::SqliteValueStore;
use crate::repo::RepoResult;
use log::warn;
use std::collections::{BTreeMap, HashSet};

/// Resolves aliases against their originals.
pub struct AliasResolver<'a, 'conn> {
    entities: &'a SqliteEntityRepository<'conn>,
    values: &'a SqliteValueStore<'conn>,
}

impl<'a, 'conn> AliasResolver<'a, 'conn> {
    pub fn new(
        entities: &'a SqliteEntityRepository<'conn>,
        values: &'a SqliteValueStore<'conn>,
    ) -> Self {
        Self { entities, values }
    }

    /// First active non-alias entity reached from `entity` through `alias_id`.
    ///
    /// Returns `None` for non-aliases and for broken or cyclic chains.
    pub fn original(&self, entity: &Entity) -> RepoResult<Option<Entity>> {
        let mut visited: HashSet<EntityId> = HashSet::from([entity.id]);
        let mut cursor = entity.alias_id.filter(|id| *id > 0);

        while let Some(current) = cursor {
            if !visited.insert(current) {
                warn!(
                    "event=alias_corruption module=service status=degraded entity_id={} reason=cycle",
                    entity.id
                );
                return Ok(None);
            }
            let Some(candidate) = self.entities.get(current, false)? else {
                warn!(
                    "event=alias_resolve module=service status=degraded entity_id={} original_id={} reason=missing_original",
                    entity.id, current
                );
                return Ok(None);
            };
            if !candidate.is_alias() {
                return Ok(Some(candidate));
            }
            cursor = candidate.alias_id;
        }

        Ok(None)
    }

    /// Returns `entity` with null inheritable core fields filled from its
    /// original.
    pub fn resolve(&self, mut entity: Entity) -> RepoResult<Entity> {
        if !entity.is_alias() {
            return Ok(entity);
        }
        let Some(original) = self.original(&entity)? else {
            return Ok(entity);
        };

        if entity.href.is_none() {
            entity.href = original.href;
        }
        if entity.content.is_none() {
            entity.content = original.content;
        }
        if entity.created_by.is_none() {
            entity.created_by = original.created_by;
        }
        if entity.updated_by.is_none() {
            entity.updated_by = original.updated_by;
        }
        Ok(entity)
    }

    pub fn resolve_all(&self, entities: Vec<Entity>) -> RepoResult<Vec<Entity>> {
        entities
            .into_iter()
            .map(|entity| self.resolve(entity))
            .collect()
    }

    /// Own value of `name`, or the original's when unset on an alias.
    pub fn attribute(&self, entity: &Entity, name: &str) -> RepoResult<Option<TypedValue>> {
        let own = self.values.get(entity, name)?;
        if own.is_some() || !entity.is_alias() {
            return Ok(own);
        }
        match self.original(entity)? {
            Some(original) => self.values.get(&original, name),
            None => Ok(None),
        }
    }

    /// Own values merged over the original's values for aliases.
    pub fn attributes(&self, entity: &Entity) -> RepoResult<BTreeMap<String, TypedValue>> {
        let mut values = self.values.values(entity)?;
        if !entity.is_alias() {
            return Ok(values);
        }
        if let Some(original) = self.original(entity)? {
            for (name, value) in self.values.values(&original)? {
                values.entry(name).or_insert(value);
            }
        }
        Ok(values)
    }
}
