//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for entities, definitions, values and
//!   placements.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repositories only run on connections migrated to the latest schema.
//! - Repository APIs return semantic errors (`NotFound`, `UnknownAttribute`)
//!   in addition to DB transport errors.
//! - Statements run on the borrowed connection, so they join whatever
//!   transaction the caller holds open.

use crate::codec::CodecError;
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::attribute::DefinitionValidationError;
use crate::model::entity::EntityId;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod definition_repo;
pub mod entity_repo;
pub mod placement_repo;
pub mod value_repo;

pub type RepoResult<T> = Result<T, RepoError>;

const REQUIRED_TABLES: [&str; 4] = [
    "entities",
    "attribute_definitions",
    "attribute_values",
    "placements",
];

/// Repository error for content store persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Operation needs a persisted, typed entity.
    NotSaved,
    /// No definition matches `(name, model_type)`.
    UnknownAttribute { name: String, model_type: String },
    /// Value shape is incompatible with the attribute's codec.
    TypeMismatch { name: String, source: CodecError },
    /// Failures collected by a batch write, in key order.
    Attributes(Vec<RepoError>),
    InvalidDefinition(DefinitionValidationError),
    /// Codec failure not tied to one input value (unknown kind, bad stored text).
    Codec(CodecError),
    /// Query predicate cannot be expressed.
    InvalidPredicate(String),
    NotFound(EntityId),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl RepoError {
    /// Returns whether this error, or every error it aggregates, is an
    /// unknown-attribute failure.
    pub fn is_unknown_attribute(&self) -> bool {
        match self {
            Self::UnknownAttribute { .. } => true,
            Self::Attributes(errors) => {
                !errors.is_empty() && errors.iter().all(Self::is_unknown_attribute)
            }
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
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
            Self::InvalidDefinition(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::InvalidPredicate(message) => write!(f, "invalid query predicate: {message}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "content store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "content store requires table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::TypeMismatch { source, .. } => Some(source),
            Self::InvalidDefinition(err) => Some(err),
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<DefinitionValidationError> for RepoError {
    fn from(value: DefinitionValidationError) -> Self {
        Self::InvalidDefinition(value)
    }
}

impl From<CodecError> for RepoError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

/// Verifies `conn` is migrated and carries every content store table.
pub fn ensure_store_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

#[cfg(test)]
mod tests {
    use super::{ensure_store_connection_ready, RepoError};
    use crate::db::open_db_in_memory;
    use rusqlite::Connection;

    #[test]
    fn migrated_connection_is_ready() {
        let conn = open_db_in_memory().unwrap();
        ensure_store_connection_ready(&conn).unwrap();
    }

    #[test]
    fn raw_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            ensure_store_connection_ready(&conn),
            Err(RepoError::UninitializedConnection {
                actual_version: 0,
                ..
            })
        ));
    }

    #[test]
    fn dropped_table_is_reported() {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE placements;")
            .unwrap();
        assert!(matches!(
            ensure_store_connection_ready(&conn),
            Err(RepoError::MissingRequiredTable("placements"))
        ));
    }

    #[test]
    fn unknown_attribute_classification_sees_through_aggregates() {
        let unknown = || RepoError::UnknownAttribute {
            name: "color".to_string(),
            model_type: "product".to_string(),
        };
        assert!(unknown().is_unknown_attribute());
        assert!(RepoError::Attributes(vec![unknown(), unknown()]).is_unknown_attribute());
        assert!(!RepoError::Attributes(vec![unknown(), RepoError::NotSaved]).is_unknown_attribute());
        assert!(!RepoError::Attributes(Vec::new()).is_unknown_attribute());
    }
}
