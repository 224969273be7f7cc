//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into entity-level use cases.
//! - Keep request layers decoupled from storage details.
//!
//! # Invariants
//! - Multi-step writes run inside one `IMMEDIATE` transaction.
//! - Placement corruption is logged and degraded, never returned.

use crate::codec::CodecError;
use crate::db::DbError;
use crate::model::entity::{EntityId, EntityValidationError};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod alias;
pub mod entity_store;
pub mod placement_service;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from entity store and placement tree operations.
#[derive(Debug)]
pub enum StoreError {
    /// Payload failed validation; nothing was written.
    Validation(EntityValidationError),
    /// An active entity with the same identity already exists.
    AlreadyExists { kind: String, title: String },
    ParentNotFound(EntityId),
    /// Alias target does not exist or is soft-deleted.
    OriginalNotFound(EntityId),
    NotFound(EntityId),
    /// Illegal children mode or alias misuse.
    InvalidMode(String),
    /// Operation needs a persisted, typed entity.
    NotSaved,
    UnknownAttribute { name: String, model_type: String },
    TypeMismatch { name: String, source: CodecError },
    /// Failures collected by a batch attribute write.
    Attributes(Vec<StoreError>),
    /// Placing `child` under `parent` would create a cycle.
    CyclicPlacement { parent: EntityId, child: EntityId },
    Repo(RepoError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::AlreadyExists { kind, title } => {
                write!(f, "{kind} `{title}` already exists")
            }
            Self::ParentNotFound(id) => write!(f, "parent entity not found: {id}"),
            Self::OriginalNotFound(id) => write!(f, "original entity not found: {id}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::InvalidMode(message) => write!(f, "invalid mode: {message}"),
            Self::NotSaved => write!(f, "entity must be saved with a type first"),
            Self::UnknownAttribute { name, model_type } => {
                write!(f, "no attribute `{name}` is defined for type `{model_type}`")
            }
            Self::TypeMismatch { name, source } => write!(f, "attribute `{name}`: {source}"),
            Self::Attributes(errors) => {
                write!(f, "{} attribute error(s): ", errors.len())?;
                for (index, err) in errors.iter().enumerate() {
                    if index > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
            Self::CyclicPlacement { parent, child } => write!(
                f,
                "placing entity {child} under {parent} would create a cycle"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::TypeMismatch { source, .. } => Some(source),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for StoreError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotSaved => Self::NotSaved,
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::UnknownAttribute { name, model_type } => {
                Self::UnknownAttribute { name, model_type }
            }
            RepoError::TypeMismatch { name, source } => Self::TypeMismatch { name, source },
            RepoError::Attributes(errors) => {
                Self::Attributes(errors.into_iter().map(Into::into).collect())
            }
            other => Self::Repo(other),
        }
    }
}

impl From<EntityValidationError> for StoreError {
    fn from(value: EntityValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;
    use crate::repo::RepoError;

    #[test]
    fn repo_semantic_errors_map_to_store_variants() {
        let mapped = StoreError::from(RepoError::Attributes(vec![
            RepoError::UnknownAttribute {
                name: "color".to_string(),
                model_type: "product".to_string(),
            },
            RepoError::NotFound(4),
        ]));
        let StoreError::Attributes(errors) = &mapped else {
            panic!("expected aggregate, got {mapped:?}");
        };
        assert!(matches!(errors[0], StoreError::UnknownAttribute { .. }));
        assert!(matches!(errors[1], StoreError::NotFound(4)));
        assert!(matches!(
            StoreError::from(RepoError::InvalidData("x".to_string())),
            StoreError::Repo(RepoError::InvalidData(_))
        ));
    }
}
