//! Connection handling for the SQLite store.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use crate::error::{DedupError, Result, Stage};

/// Open an existing store for a deduplication run.
///
/// The file must already exist. Storage-side FK enforcement is switched off
/// so that `ON DELETE` actions never fire while duplicates are removed; the
/// engine rewrites references itself and checks integrity before commit.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(DedupError::storage_at(Stage::Open, &path.display().to_string()))?;
    prepare(&conn)?;
    Ok(conn)
}

/// Open a store without write access.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(DedupError::storage_at(Stage::Open, &path.display().to_string()))
}

/// Apply the pragmas a run expects to an already-open connection.
pub fn prepare(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", 0)
        .map_err(DedupError::storage_at(Stage::Open, "pragma foreign_keys"))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(DedupError::storage_at(Stage::Open, "busy_timeout"))?;
    Ok(())
}

/// Connection settings a run overrides, captured so they can be put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    foreign_keys: i64,
    busy_timeout_ms: i64,
}

impl ConnectionSettings {
    pub fn capture(conn: &Connection) -> Result<Self> {
        let foreign_keys = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .map_err(DedupError::storage_at(Stage::Open, "pragma foreign_keys"))?;
        let busy_timeout_ms = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .map_err(DedupError::storage_at(Stage::Open, "pragma busy_timeout"))?;
        Ok(Self { foreign_keys, busy_timeout_ms })
    }

    /// Must run outside a transaction; SQLite ignores `foreign_keys` inside one.
    pub fn restore(&self, conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)
            .map_err(DedupError::storage_at(Stage::Commit, "pragma foreign_keys"))?;
        conn.pragma_update(None, "busy_timeout", self.busy_timeout_ms)
            .map_err(DedupError::storage_at(Stage::Commit, "pragma busy_timeout"))?;
        Ok(())
    }
}

/// Begin the run's transaction, taking the write lock up front.
pub fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(DedupError::storage_at(Stage::Open, "begin transaction"))
}

/// Columns of `table`, in declaration order. Empty if the table is missing.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(DedupError::storage(table))?;
    let cols = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(DedupError::storage(table))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(DedupError::storage(table))?;
    Ok(cols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_refuses_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(&dir.path().join("absent.db")).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Open));
    }

    #[test]
    fn prepare_disables_enforcement() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", 1).unwrap();
        prepare(&conn).unwrap();
        let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(on, 0);
    }

    #[test]
    fn settings_survive_prepare_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", 1).unwrap();
        conn.busy_timeout(std::time::Duration::from_millis(250)).unwrap();
        let saved = ConnectionSettings::capture(&conn).unwrap();

        prepare(&conn).unwrap();
        assert_ne!(ConnectionSettings::capture(&conn).unwrap(), saved);

        saved.restore(&conn).unwrap();
        assert_eq!(ConnectionSettings::capture(&conn).unwrap(), saved);
    }

    #[test]
    fn lists_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE units (id INTEGER PRIMARY KEY, name TEXT, symbol TEXT);")
            .unwrap();
        assert_eq!(table_columns(&conn, "units").unwrap(), vec!["id", "name", "symbol"]);
        assert!(table_columns(&conn, "nope").unwrap().is_empty());
    }
}
