//! Database connection management

use std::path::Path;
use std::time::Duration;

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;

/// How long a writer waits for another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite database at the given path
///
/// # Errors
///
/// `Unreachable` when SQLite cannot open the file.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Configure a connection for repository use
///
/// # Errors
///
/// The classified SQLite failure of a refused pragma.
pub fn configure(conn: &Connection) -> Result<()> {
    // Cascading deletes of groups and snapshots rely on this
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(from_rusqlite)?;

    // journal_mode answers with the mode in effect ("memory" for in-memory databases)
    let _mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(from_rusqlite)?;

    conn.busy_timeout(BUSY_TIMEOUT).map_err(from_rusqlite)?;
    Ok(())
}
