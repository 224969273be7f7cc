//! SQLite storage bootstrap, schema migrations and transaction scoping.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the content store.
//! - Apply schema migrations in deterministic order.
//! - Provide the single transaction entry point used by multi-step writes.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Store code must not read/write entity data before migrations succeed.
//! - Write transactions are `IMMEDIATE`, so the write lock is held from `BEGIN`.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Runs `work` inside one `IMMEDIATE` transaction on `conn`.
///
/// Commits when `work` succeeds and rolls back (on drop) when it fails.
/// When `conn` is already inside a transaction, `work` joins it and the
/// outer owner decides commit or rollback.
///
/// Taking the write lock at `BEGIN` serializes every read-modify-write that
/// runs through here, across all connections to the same database file.
pub fn with_write_transaction<T, E>(
    conn: &Connection,
    work: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<rusqlite::Error>,
{
    if !conn.is_autocommit() {
        return work();
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let value = work()?;
    tx.commit()?;
    Ok(value)
}

/// Current time as Unix epoch milliseconds, matching column defaults.
pub(crate) fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::{open_db_in_memory, with_write_transaction, DbError};

    #[test]
    fn write_transaction_commits_on_success() {
        let conn = open_db_in_memory().unwrap();
        with_write_transaction(&conn, || -> Result<(), DbError> {
            conn.execute(
                "INSERT INTO entities (title, type) VALUES ('Kept', 'site');",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn write_transaction_rolls_back_on_error() {
        let conn = open_db_in_memory().unwrap();
        let result = with_write_transaction(&conn, || -> Result<(), DbError> {
            conn.execute(
                "INSERT INTO entities (title, type) VALUES ('Dropped', 'site');",
                [],
            )?;
            Err(DbError::UnsupportedSchemaVersion {
                db_version: 0,
                latest_supported: 0,
            })
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn nested_write_transaction_joins_outer_one() {
        let conn = open_db_in_memory().unwrap();
        let result = with_write_transaction(&conn, || -> Result<(), DbError> {
            with_write_transaction(&conn, || -> Result<(), DbError> {
                conn.execute(
                    "INSERT INTO entities (title, type) VALUES ('Inner', 'site');",
                    [],
                )?;
                Ok(())
            })?;
            Err(DbError::UnsupportedSchemaVersion {
                db_version: 0,
                latest_supported: 0,
            })
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
