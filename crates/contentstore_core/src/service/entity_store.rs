//! Entity store use-case service.
//!
//! # Responsibility
//! - Create entities with their attribute values and placement atomically.
//! - Answer identity, search and alias-aware read queries.
//! - Update and soft-delete entities without breaking tree consistency.
//!
//! # Invariants
//! - Validation failures are raised before any write.
//! - `create` steps after validation run in one `IMMEDIATE` transaction; a
//!   failure leaves no entity, value or placement behind.
//! - Reads return alias-resolved entities; writes target an alias's own rows.
//! - An entity's `type` never changes.

use super::alias::AliasResolver;
use super::placement_service::PlacementTree;
use super::{StoreError, StoreResult};
use crate::codec::CodecRegistry;
use crate::db::with_write_transaction;
use crate::model::attribute::{AttributeValue, NewAttributeDefinition};
use crate::model::entity::{
    alias_id_of, model_type_of, optional_id, optional_string, split_values, CoreFields, Entity,
    EntityId, EntityValidationError, Values, REQUIRED_CORE_ATTRIBUTES,
};
use crate::model::placement::ChildrenMode;
use crate::model::value::TypedValue;
use crate::repo::definition_repo::{DefinitionRegistry, SqliteDefinitionRegistry};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::ensure_store_connection_ready;
use crate::repo::value_repo::{AttributeInput, SqliteValueStore};
use crate::search::query::{IdentityProbe, QueryComposer};
use log::{error, info};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Create request: payload plus placement and schema options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CreateEntity {
    /// Flat payload of core fields and attribute values.
    pub values: Values,
    /// `None` places under the invoker, `<= 0` at the root, `> 0` under that
    /// entity.
    pub parent: Option<i64>,
    pub ignore_unknown_attributes: bool,
    /// Definitions registered for the payload's type before values are set.
    pub definitions: Vec<NewAttributeDefinition>,
    pub override_definitions: bool,
}

impl CreateEntity {
    pub fn new(values: Values) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: i64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn ignore_unknown_attributes(mut self) -> Self {
        self.ignore_unknown_attributes = true;
        self
    }

    pub fn with_definitions(
        mut self,
        definitions: Vec<NewAttributeDefinition>,
        override_existing: bool,
    ) -> Self {
        self.definitions = definitions;
        self.override_definitions = override_existing;
        self
    }
}

/// Serializable read model of one entity with its surroundings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub entity: Entity,
    pub attributes: BTreeMap<String, TypedValue>,
    pub parent: Option<Entity>,
    pub children: Vec<Entity>,
}

/// Entity store facade over one connection.
pub struct EntityStore<'conn> {
    conn: &'conn Connection,
    entities: SqliteEntityRepository<'conn>,
    values: SqliteValueStore<'conn>,
    tree: PlacementTree<'conn>,
}

impl<'conn> EntityStore<'conn> {
    /// Creates a store with the built-in attribute-type catalog.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        Self::with_codecs(conn, Arc::new(CodecRegistry::builtin()))
    }

    /// Creates a store with a custom codec registry.
    pub fn with_codecs(conn: &'conn Connection, codecs: Arc<CodecRegistry>) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self {
            conn,
            entities: SqliteEntityRepository::new(conn),
            values: SqliteValueStore::new(conn, codecs),
            tree: PlacementTree::new(conn),
        })
    }

    pub fn tree(&self) -> &PlacementTree<'conn> {
        &self.tree
    }

    pub fn values(&self) -> &SqliteValueStore<'conn> {
        &self.values
    }

    pub fn registry(&self) -> &SqliteDefinitionRegistry<'conn> {
        self.values.registry()
    }

    fn resolver(&self) -> AliasResolver<'_, 'conn> {
        AliasResolver::new(&self.entities, &self.values)
    }

    fn composer(&self) -> QueryComposer<'_, 'conn> {
        QueryComposer::new(self.conn, &self.values)
    }

    /// Creates an entity with no invoker; `parent: None` places it at the root.
    pub fn create(&self, request: CreateEntity) -> StoreResult<Entity> {
        self.create_under(None, request)
    }

    /// Creates an entity on behalf of `invoker`, the default parent.
    pub fn create_from(&self, invoker: &Entity, request: CreateEntity) -> StoreResult<Entity> {
        self.create_under(Some(invoker), request)
    }

    fn create_under(&self, invoker: Option<&Entity>, request: CreateEntity) -> StoreResult<Entity> {
        let started_at = Instant::now();
        let parent = self.resolve_parent(invoker, request.parent)?;
        let (kind, core) = self.validate_create(&request)?;

        let result = with_write_transaction(self.conn, || {
            if self.identity_exists(&kind, &core.title, &request.values)? {
                return Err(StoreError::AlreadyExists {
                    kind: kind.clone(),
                    title: core.title.clone(),
                });
            }
            if !request.definitions.is_empty() {
                self.registry().bulk_create(
                    &request.definitions,
                    &kind,
                    request.override_definitions,
                )?;
            }

            let entity = self.entities.insert(&core)?;
            let (_, attributes) = split_values(&request.values);
            self.values
                .set_many(&entity, &attributes, request.ignore_unknown_attributes)?;
            self.tree.place(&entity, parent.as_ref())?;
            Ok(entity)
        });

        match result {
            Ok(entity) => {
                info!(
                    "event=entity_create module=service status=ok entity_id={} type={} parent_id={} duration_ms={}",
                    entity.id,
                    entity.kind,
                    parent.as_ref().map_or(0, |parent| parent.id),
                    started_at.elapsed().as_millis()
                );
                Ok(entity)
            }
            Err(err) => {
                self.registry().invalidate(&kind);
                error!(
                    "event=entity_create module=service status=error type={} duration_ms={} error={}",
                    kind,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn resolve_parent(
        &self,
        invoker: Option<&Entity>,
        parent: Option<i64>,
    ) -> StoreResult<Option<Entity>> {
        match parent {
            None => Ok(invoker.filter(|invoker| invoker.is_saved()).cloned()),
            Some(id) if id <= 0 => Ok(None),
            Some(id) => self
                .entities
                .get(id, false)?
                .map(Some)
                .ok_or(StoreError::ParentNotFound(id)),
        }
    }

    // Returns the payload type and the core columns to insert.
    fn validate_create(&self, request: &CreateEntity) -> StoreResult<(String, CoreFields)> {
        let values = &request.values;
        let kind = model_type_of(values)?.to_string();
        let alias_id = alias_id_of(values)?;

        let mut required: BTreeSet<String> = REQUIRED_CORE_ATTRIBUTES
            .iter()
            .map(|name| name.to_string())
            .collect();
        if alias_id.is_none() {
            required.extend(
                self.registry()
                    .get_required(&kind)?
                    .into_iter()
                    .map(|definition| definition.name),
            );
            required.extend(
                request
                    .definitions
                    .iter()
                    .filter(|definition| definition.required)
                    .map(|definition| definition.name.clone()),
            );
        }

        let missing: Vec<String> = required
            .into_iter()
            .filter(|name| values.get(name).map_or(true, JsonValue::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(EntityValidationError::MissingAttributes(missing).into());
        }

        if let Some(original_id) = alias_id {
            self.check_original(&kind, original_id)?;
        }
        Ok((kind, CoreFields::from_values(values)?))
    }

    fn check_original(&self, kind: &str, original_id: EntityId) -> StoreResult<()> {
        let original = self
            .entities
            .get(original_id, false)?
            .ok_or(StoreError::OriginalNotFound(original_id))?;
        if original.kind != kind {
            return Err(EntityValidationError::AliasTypeMismatch {
                alias_type: kind.to_string(),
                original_type: original.kind,
            }
            .into());
        }
        Ok(())
    }

    /// Returns whether an active entity with the same identity exists.
    ///
    /// Identity is `type` + `title` plus every required attribute present in
    /// `values`; aliases and non-aliases share one identity space. `type_override` and
    /// `title_override` replace the payload's own keys.
    pub fn exists(
        &self,
        values: &Values,
        type_override: Option<&str>,
        title_override: Option<&str>,
    ) -> StoreResult<bool> {
        let kind = match type_override {
            Some(kind) => kind.to_string(),
            None => model_type_of(values)?.to_string(),
        };
        let title = match title_override {
            Some(title) => title.to_string(),
            None => optional_string(values, "title")?.ok_or_else(|| {
                EntityValidationError::MissingAttributes(vec!["title".to_string()])
            })?,
        };
        self.identity_exists(&kind, &title, values)
    }

    fn identity_exists(&self, kind: &str, title: &str, values: &Values) -> StoreResult<bool> {
        let codecs = self.values.codecs();
        let mut attributes = Vec::new();
        for definition in self.registry().get_required(kind)? {
            let Some(value) = values.get(&definition.name).filter(|value| !value.is_null())
            else {
                continue;
            };
            // A value its codec rejects matches no stored row; `set_many`
            // reports the mismatch with the rest of the batch.
            let Ok(raw_value) = codecs.serialize(&definition.kind, value) else {
                return Ok(false);
            };
            attributes.push((definition.id, raw_value));
        }

        let probe = IdentityProbe {
            kind: kind.to_string(),
            title: title.to_string(),
            attributes,
        };
        Ok(self.composer().identity_exists(&probe)?)
    }

    /// Active entities matching every predicate, alias-resolved, by id.
    pub fn search(&self, predicates: &Values) -> StoreResult<Vec<Entity>> {
        let found = self.composer().search(predicates)?;
        Ok(self.resolver().resolve_all(found)?)
    }

    /// First match of [`Self::search`], if any.
    pub fn find_one(&self, predicates: &Values) -> StoreResult<Option<Entity>> {
        Ok(self.search(predicates)?.into_iter().next())
    }

    /// Active entity by id, alias-resolved.
    pub fn get(&self, id: EntityId) -> StoreResult<Entity> {
        let entity = self.entities.get(id, false)?.ok_or(StoreError::NotFound(id))?;
        Ok(self.resolver().resolve(entity)?)
    }

    /// Distinct types of active entities, sorted.
    pub fn list_types(&self) -> StoreResult<Vec<String>> {
        Ok(self.entities.list_types()?)
    }

    /// Active non-alias entities of `kind`, by id.
    pub fn list(&self, kind: &str) -> StoreResult<Vec<Entity>> {
        Ok(self.entities.list_originals(kind)?)
    }

    /// Updates core fields and attribute values of an active entity.
    ///
    /// Writable core keys are `title`, `href`, `content`, `alias_id` and
    /// `updated_by`; other core keys are ignored. A `type` different from the
    /// stored one is rejected.
    pub fn update(&self, id: EntityId, values: &Values, ignore_unknown: bool) -> StoreResult<Entity> {
        let current = self.entities.get(id, false)?.ok_or(StoreError::NotFound(id))?;
        if values.contains_key("type") {
            let requested = model_type_of(values)?;
            if requested != current.kind {
                return Err(EntityValidationError::ImmutableType {
                    current: current.kind,
                    requested: requested.to_string(),
                }
                .into());
            }
        }

        let mut next = current.clone();
        if values.contains_key("title") {
            next.title = optional_string(values, "title")?.ok_or_else(|| {
                EntityValidationError::MissingAttributes(vec!["title".to_string()])
            })?;
        }
        if values.contains_key("href") {
            next.href = optional_string(values, "href")?;
        }
        if values.contains_key("content") {
            next.content = optional_string(values, "content")?;
        }
        if values.contains_key("updated_by") {
            next.updated_by = optional_id(values, "updated_by")?;
        }
        if values.contains_key("alias_id") {
            next.alias_id = alias_id_of(values)?;
            if let Some(original_id) = next.alias_id {
                self.check_alias_target(&next, original_id)?;
            }
        }

        let (_, attributes) = split_values(values);
        let updated = with_write_transaction(self.conn, || {
            let updated = self.entities.update(&next)?;
            self.values.set_many(&updated, &attributes, ignore_unknown)?;
            Ok::<_, StoreError>(updated)
        })?;

        info!(
            "event=entity_update module=service status=ok entity_id={} attributes={}",
            id,
            attributes.len()
        );
        Ok(updated)
    }

    fn check_alias_target(&self, entity: &Entity, original_id: EntityId) -> StoreResult<()> {
        self.check_original(&entity.kind, original_id)?;

        // Walk the target's chain; reaching `entity` would close a cycle.
        let mut visited = HashSet::new();
        let mut cursor = Some(original_id);
        while let Some(current) = cursor {
            if current == entity.id {
                return Err(StoreError::InvalidMode(format!(
                    "entity {} cannot alias {original_id}: the alias chain leads back to it",
                    entity.id
                )));
            }
            if !visited.insert(current) {
                break;
            }
            cursor = self
                .entities
                .get(current, false)?
                .and_then(|next| next.alias_id)
                .filter(|id| *id > 0);
        }
        Ok(())
    }

    /// Soft-deletes an entity and removes it from its parent's children.
    ///
    /// Attribute values are kept. Children stay placed under the deleted
    /// entity and read as parentless.
    pub fn soft_delete(&self, id: EntityId) -> StoreResult<()> {
        with_write_transaction(self.conn, || {
            let entity = self.entities.get(id, false)?.ok_or(StoreError::NotFound(id))?;
            self.tree.detach(&entity)?;
            self.entities.soft_delete(id)?;
            Ok::<_, StoreError>(())
        })?;

        info!("event=entity_delete module=service status=ok entity_id={id}");
        Ok(())
    }

    /// Active aliases pointing directly at `entity`, alias-resolved.
    pub fn aliases(&self, entity: &Entity) -> StoreResult<Vec<Entity>> {
        let aliases = self.entities.list_aliases(entity.id)?;
        Ok(self.resolver().resolve_all(aliases)?)
    }

    /// Original behind an alias; `None` for non-aliases.
    pub fn original(&self, entity: &Entity) -> StoreResult<Option<Entity>> {
        Ok(self.resolver().original(entity)?)
    }

    /// Alias-aware typed value of one attribute.
    pub fn attribute(&self, entity: &Entity, name: &str) -> StoreResult<Option<TypedValue>> {
        Ok(self.resolver().attribute(entity, name)?)
    }

    /// Alias-aware typed values of all attributes.
    pub fn attributes(&self, entity: &Entity) -> StoreResult<BTreeMap<String, TypedValue>> {
        Ok(self.resolver().attributes(entity)?)
    }

    /// Writes one attribute on `entity` itself, even when it is an alias.
    pub fn set_attribute(
        &self,
        entity: &Entity,
        name: &str,
        input: impl Into<AttributeInput>,
    ) -> StoreResult<AttributeValue> {
        Ok(self.values.set(entity, name, input)?)
    }

    /// Read model of `entity` with attributes, parent and `mode` children.
    pub fn view(&self, entity: &Entity, mode: ChildrenMode) -> StoreResult<EntityView> {
        let resolver = self.resolver();
        let children = self.tree.children(entity, mode)?;
        Ok(EntityView {
            entity: resolver.resolve(entity.clone())?,
            attributes: resolver.attributes(entity)?,
            parent: self.tree.parent(entity)?,
            children: resolver.resolve_all(children)?,
        })
    }
}
