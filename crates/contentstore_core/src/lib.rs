//! Core library of the content store.
//! This crate is the single source of truth for entity, attribute and
//! placement invariants.

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use codec::{AttributeCodec, CodecError, CodecRegistry, EntityLookup};
pub use config::{AttributeTypeCatalog, AttributeTypeSpec, ConfigError};
pub use db::{open_db, open_db_in_memory, with_write_transaction, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::attribute::{AttributeDefinition, AttributeValue, NewAttributeDefinition};
pub use model::entity::{Entity, EntityId, EntityValidationError, Values};
pub use model::placement::{ChildrenMode, Placement};
pub use model::value::{Coords, TypedValue};
pub use repo::definition_repo::{DefinitionRegistry, SqliteDefinitionRegistry};
pub use repo::value_repo::{AttributeInput, SqliteValueStore};
pub use repo::{RepoError, RepoResult};
pub use service::entity_store::{CreateEntity, EntityStore, EntityView};
pub use service::placement_service::PlacementTree;
pub use service::{StoreError, StoreResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
