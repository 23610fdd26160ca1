//! Connection ownership and transaction scoping.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use dodoco_common::error::{DodocoError, Result};
use rusqlite::{Connection, TransactionBehavior};

use crate::schema::{SCHEMA_SQL, SCHEMA_VERSION};

/// Handle to the database.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

/// Query surface bound to one connection or transaction.
///
/// Entity accessors live in the `containers`, `ports`, and `projects`
/// modules as `impl Session` blocks.
#[derive(Debug)]
pub struct Session<'c> {
    pub(crate) conn: &'c Connection,
}

impl Store {
    /// Opens (or creates) a database file and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DodocoError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("store.open", &e))?;
        tracing::info!(path = %path.display(), "opened store");
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("store.open", &e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| db_err("store.init", &e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| db_err("store.init", &e))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| db_err("store.init", &e))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| db_err("store.init", &e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DodocoError::infra("store.lock", "connection mutex poisoned"))
    }

    /// Runs `f` outside a transaction. Each statement autocommits.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` or from acquiring the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&Session { conn: &conn })
    }

    /// Runs `f` inside an `IMMEDIATE` transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err`. Concurrent writers are serialized for the duration.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f`, or an infrastructure error if the
    /// transaction cannot begin or commit.
    pub fn write<T>(&self, f: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| db_err("store.begin", &e))?;
        match f(&Session { conn: &tx }) {
            Ok(value) => {
                tx.commit().map_err(|e| db_err("store.commit", &e))?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(error = %err, "rolling back transaction");
                drop(tx);
                Err(err)
            }
        }
    }
}

/// Returns whether the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Maps a database error into the workspace taxonomy.
///
/// Uniqueness violations are conflicts; everything else is infrastructure.
pub(crate) fn db_err(operation: &'static str, err: &rusqlite::Error) -> DodocoError {
    if is_unique_violation(err) {
        DodocoError::conflict(err.to_string())
    } else {
        DodocoError::infra(operation, err.to_string())
    }
}

/// Wraps a column parse failure so it can travel through `rusqlite`.
pub(crate) fn conversion_err(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("dodoco.sqlite3");
        let _store = Store::open(&path).expect("open");
        assert!(path.exists());
    }

    #[test]
    fn reopen_keeps_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dodoco.sqlite3");
        drop(Store::open(&path).expect("open"));
        let store = Store::open(&path).expect("reopen");
        let version: i32 = store
            .read(|s| {
                s.conn
                    .query_row("PRAGMA user_version", [], |r| r.get(0))
                    .map_err(|e| db_err("test", &e))
            })
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn write_rolls_back_on_error() {
        let store = Store::in_memory().expect("store");
        let result: Result<()> = store.write(|s| {
            let _ = s
                .conn
                .execute(
                    "INSERT INTO projects (name, created_at, modified_at) VALUES ('p', 'x', 'x')",
                    [],
                )
                .map_err(|e| db_err("test", &e))?;
            Err(DodocoError::conflict("abort"))
        });
        assert!(result.is_err());

        let count: i64 = store
            .read(|s| {
                s.conn
                    .query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))
                    .map_err(|e| db_err("test", &e))
            })
            .expect("count");
        assert_eq!(count, 0);
    }
}
