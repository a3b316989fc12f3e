//! Migration runner
//!
//! Every embedded migration is applied once and its checksum recorded. The
//! database is refused when an applied migration's SQL has changed since,
//! or when it records migrations this build does not ship.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::embedded::{get_migrations, Migration};

const SCHEMA_VERSION_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    migration_id TEXT NOT NULL UNIQUE,
    applied_at INTEGER NOT NULL,
    checksum TEXT
)";

/// Bring the database schema up to date
///
/// # Errors
///
/// `Persistence` when the recorded history does not match this build or
/// a migration fails to run.
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_VERSION_DDL)
        .map_err(from_rusqlite)?;

    let pending = plan(&recorded_checksums(conn)?, get_migrations())?;
    if pending.is_empty() {
        debug!("schema up to date");
    }
    for migration in pending {
        run(conn, &migration)?;
    }
    Ok(())
}

/// Ids of the migrations recorded in `schema_version`, in application order
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT migration_id FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let rows = stmt.query_map([], |row| row.get(0)).map_err(from_rusqlite)?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(from_rusqlite)
}

/// Recorded migration id to its checksum; legacy rows may lack one
fn recorded_checksums(conn: &Connection) -> Result<HashMap<String, Option<String>>> {
    let mut stmt = conn
        .prepare("SELECT migration_id, checksum FROM schema_version")
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(from_rusqlite)?;
    rows.collect::<rusqlite::Result<HashMap<_, _>>>()
        .map_err(from_rusqlite)
}

/// The migrations still to run, after checking the recorded history
fn plan(
    recorded: &HashMap<String, Option<String>>,
    shipped: Vec<Migration>,
) -> Result<Vec<Migration>> {
    let unknown = recorded
        .keys()
        .find(|id| !shipped.iter().any(|m| m.id == id.as_str()));
    if let Some(unknown) = unknown {
        return Err(migration_error(
            unknown,
            "recorded in the database but unknown to this build",
        ));
    }

    let mut pending = Vec::new();
    for migration in shipped {
        match recorded.get(migration.id) {
            None => pending.push(migration),
            Some(Some(expected)) => {
                let actual = compute_checksum(migration.sql);
                if *expected != actual {
                    return Err(checksum_mismatch(migration.id, expected, &actual));
                }
            }
            Some(None) => {}
        }
    }
    Ok(pending)
}

fn run(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?1, ?2, ?3)",
        params![
            migration.id,
            chrono::Utc::now().timestamp(),
            compute_checksum(migration.sql)
        ],
    )
    .map_err(from_rusqlite)?;
    tx.commit().map_err(from_rusqlite)?;

    info!(migration = migration.id, "migration applied");
    Ok(())
}
