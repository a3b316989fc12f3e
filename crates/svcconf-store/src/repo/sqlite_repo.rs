//! SQLite repository implementation
//!
//! One row per entity and per property group; a group's decorations and
//! layered properties are JSON columns. Commits run in an IMMEDIATE
//! transaction that re-reads the stored version, so two connections on the
//! same file see each other's writes as conflicts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use svcconf_core::client::{CommitOutcome, EntityRef, PgRef, RepositoryClient, Transaction};
use svcconf_core::errors::{RepoError, RepoResult};
use svcconf_core::model::names::validate_simple_name;
use svcconf_core::model::{
    Decoration, Fmri, PgContents, PgFlags, PropertyContents, Snaplevel, SnapshotRef,
};
use svcconf_core::repo::apply_entries;

use crate::db;
use crate::errors::{corrupt, is_unique_violation, repo_error, Result};
use crate::migrations::{apply_migrations, compute_checksum};

const PG_COLUMNS: &str = "name, pg_type, non_persistent, version, decorations, properties";

fn sql_id(id: u64) -> i64 {
    id as i64
}

fn instance_key(fmri: &Fmri) -> &str {
    fmri.instance_name().unwrap_or("")
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Raw columns of a property-group row
struct PgRow {
    name: String,
    pg_type: String,
    non_persistent: bool,
    version: i64,
    decorations: String,
    properties: String,
}

impl PgRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            pg_type: row.get(1)?,
            non_persistent: row.get(2)?,
            version: row.get(3)?,
            decorations: row.get(4)?,
            properties: row.get(5)?,
        })
    }

    fn into_contents(self) -> RepoResult<PgContents> {
        let decorations: BTreeSet<Decoration> = serde_json::from_str(&self.decorations)
            .map_err(|e| corrupt(&format!("decorations of {}", self.name), e))?;
        let properties: BTreeMap<String, PropertyContents> = serde_json::from_str(&self.properties)
            .map_err(|e| corrupt(&format!("properties of {}", self.name), e))?;
        Ok(PgContents {
            name: self.name,
            pg_type: self.pg_type,
            flags: PgFlags {
                non_persistent: self.non_persistent,
            },
            version: self.version as u64,
            decorations,
            properties,
        })
    }
}

/// SQLite-backed repository client
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    /// Open the database at `path`, creating and migrating it as needed
    ///
    /// # Errors
    ///
    /// As `db::open`, plus any migration failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut conn = db::open(path.as_ref())?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        info!(path = %path.as_ref().display(), "repository opened");
        Ok(Self { conn })
    }

    /// Open a private in-memory repository (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = db::open_in_memory()?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown entity.
    pub fn set_masked(&self, fmri: &Fmri, masked: bool) -> RepoResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE entities SET masked = ?1 WHERE service = ?2 AND instance = ?3",
                params![masked, fmri.service_name(), instance_key(fmri)],
            )
            .map_err(repo_error)?;
        if changed == 0 {
            return Err(RepoError::not_found(fmri.to_string()));
        }
        Ok(())
    }

    /// Entities refreshed so far, oldest first
    pub fn refresh_log(&self) -> RepoResult<Vec<Fmri>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fmri FROM refresh_log ORDER BY id")
            .map_err(repo_error)?;
        let texts = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(repo_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(repo_error)?;
        texts.iter().map(|t| Fmri::parse(t)).collect()
    }

    fn begin(&self) -> RepoResult<rusqlite::Transaction<'_>> {
        rusqlite::Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(repo_error)
    }

    fn lookup(conn: &Connection, fmri: &Fmri) -> RepoResult<Option<(i64, bool)>> {
        conn.query_row(
            "SELECT id, masked FROM entities WHERE service = ?1 AND instance = ?2",
            params![fmri.service_name(), instance_key(fmri)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(repo_error)
    }

    /// The entity row behind `entity`, or `Deleted` if it was replaced
    fn live(conn: &Connection, entity: &EntityRef) -> RepoResult<bool> {
        match Self::lookup(conn, &entity.fmri)? {
            Some((id, masked)) if id == sql_id(entity.id) => Ok(masked),
            _ => Err(RepoError::deleted(entity.fmri.to_string())),
        }
    }

    fn load_pg(conn: &Connection, pg: &PgRef) -> RepoResult<PgContents> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM property_groups WHERE id = ?1 AND entity_id = ?2",
                    PG_COLUMNS
                ),
                params![sql_id(pg.id), sql_id(pg.entity.id)],
                PgRow::from_row,
            )
            .optional()
            .map_err(repo_error)?;
        row.ok_or_else(|| RepoError::deleted(format!("{}/{}", pg.entity.fmri, pg.name)))?
            .into_contents()
    }

    fn persistent_groups(conn: &Connection, entity_id: i64) -> RepoResult<Vec<PgContents>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM property_groups WHERE entity_id = ?1 AND non_persistent = 0 ORDER BY name",
                PG_COLUMNS
            ))
            .map_err(repo_error)?;
        let rows = stmt
            .query_map([entity_id], PgRow::from_row)
            .map_err(repo_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(repo_error)?;
        rows.into_iter().map(PgRow::into_contents).collect()
    }

    fn entity_refs(
        &self,
        sql: &str,
        param: &str,
        to_fmri: impl Fn(String) -> RepoResult<Fmri>,
    ) -> RepoResult<Vec<EntityRef>> {
        let mut stmt = self.conn.prepare(sql).map_err(repo_error)?;
        let rows = stmt
            .query_map(
                [param],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(repo_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(repo_error)?;
        rows.into_iter()
            .map(|(id, name)| {
                Ok(EntityRef {
                    fmri: to_fmri(name)?,
                    id: id as u64,
                })
            })
            .collect()
    }

    fn snapshot_ref(
        instance: &Fmri,
        name: String,
        id: String,
        taken_at: String,
    ) -> RepoResult<SnapshotRef> {
        let taken_at = DateTime::parse_from_rfc3339(&taken_at)
            .map_err(|e| RepoError::Backend {
                message: format!("corrupt snapshot timestamp: {}", e),
            })?
            .with_timezone(&Utc);
        Ok(SnapshotRef {
            instance: instance.clone(),
            name,
            id,
            taken_at,
        })
    }
}

impl RepositoryClient for SqliteRepository {
    fn list_services(&self) -> RepoResult<Vec<EntityRef>> {
        self.entity_refs(
            "SELECT id, service FROM entities WHERE instance = ?1 ORDER BY service",
            "",
            |name| Fmri::service(&name),
        )
    }

    fn list_instances(&self, service: &EntityRef) -> RepoResult<Vec<EntityRef>> {
        if service.fmri.is_instance() {
            return Err(RepoError::InvalidName {
                name: format!("{} is not a service", service.fmri),
            });
        }
        Self::live(&self.conn, service)?;
        self.entity_refs(
            "SELECT id, instance FROM entities WHERE service = ?1 AND instance != '' ORDER BY instance",
            service.fmri.service_name(),
            |name| service.fmri.child(&name),
        )
    }

    fn get_entity(&self, fmri: &Fmri) -> RepoResult<Option<EntityRef>> {
        Ok(Self::lookup(&self.conn, fmri)?.map(|(id, _)| EntityRef {
            fmri: fmri.clone(),
            id: id as u64,
        }))
    }

    fn create_entity(&self, fmri: &Fmri) -> RepoResult<EntityRef> {
        let tx = self.begin()?;
        if fmri.is_instance() && Self::lookup(&tx, &fmri.service_fmri())?.is_none() {
            return Err(RepoError::not_found(fmri.service_fmri().to_string()));
        }
        tx.execute(
            "INSERT INTO entities (service, instance, created_at) VALUES (?1, ?2, ?3)",
            params![fmri.service_name(), instance_key(fmri), now()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepoError::already_exists(fmri.to_string())
            } else {
                repo_error(e)
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(repo_error)?;
        debug!(fmri = %fmri, id, "entity created");
        Ok(EntityRef {
            fmri: fmri.clone(),
            id: id as u64,
        })
    }

    fn is_masked(&self, entity: &EntityRef) -> RepoResult<bool> {
        Self::live(&self.conn, entity)
    }

    fn delete_entity(&self, entity: &EntityRef) -> RepoResult<()> {
        let tx = self.begin()?;
        Self::live(&tx, entity)?;
        match entity.fmri.instance_name() {
            Some(_) => tx.execute("DELETE FROM entities WHERE id = ?1", [sql_id(entity.id)]),
            None => tx.execute(
                "DELETE FROM entities WHERE service = ?1",
                [entity.fmri.service_name()],
            ),
        }
        .map_err(repo_error)?;
        tx.commit().map_err(repo_error)
    }

    fn list_property_groups(&self, entity: &EntityRef) -> RepoResult<Vec<PgRef>> {
        Self::live(&self.conn, entity)?;
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM property_groups WHERE entity_id = ?1 ORDER BY name")
            .map_err(repo_error)?;
        let rows = stmt
            .query_map([sql_id(entity.id)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(repo_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(repo_error)?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| PgRef {
                entity: entity.clone(),
                name,
                id: id as u64,
            })
            .collect())
    }

    fn get_property_group(&self, entity: &EntityRef, name: &str) -> RepoResult<Option<PgRef>> {
        Self::live(&self.conn, entity)?;
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM property_groups WHERE entity_id = ?1 AND name = ?2",
                params![sql_id(entity.id), name],
                |row| row.get(0),
            )
            .optional()
            .map_err(repo_error)?;
        Ok(id.map(|id| PgRef {
            entity: entity.clone(),
            name: name.to_string(),
            id: id as u64,
        }))
    }

    fn add_property_group(
        &self,
        entity: &EntityRef,
        name: &str,
        pg_type: &str,
        flags: PgFlags,
    ) -> RepoResult<PgRef> {
        validate_simple_name(name)?;
        let tx = self.begin()?;
        Self::live(&tx, entity)?;
        tx.execute(
            "INSERT INTO property_groups (entity_id, name, pg_type, non_persistent) VALUES (?1, ?2, ?3, ?4)",
            params![sql_id(entity.id), name, pg_type, flags.non_persistent],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepoError::already_exists(format!("{}/{}", entity.fmri, name))
            } else {
                repo_error(e)
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(repo_error)?;
        Ok(PgRef {
            entity: entity.clone(),
            name: name.to_string(),
            id: id as u64,
        })
    }

    fn read_property_group(&self, pg: &PgRef) -> RepoResult<PgContents> {
        Self::load_pg(&self.conn, pg)
    }

    fn begin_transaction(&self, pg: &PgRef, owner: &Decoration) -> RepoResult<Transaction> {
        let base = Self::load_pg(&self.conn, pg)?;
        Ok(Transaction::new(pg.clone(), owner.clone(), base))
    }

    fn commit(&self, tx: Transaction) -> RepoResult<CommitOutcome> {
        let (pg, owner, base, entries) = tx.into_parts();
        let db = self.begin()?;
        let current = Self::load_pg(&db, &pg)?;
        if current.version != base.version {
            debug!(fmri = %pg.entity.fmri, pg = %pg.name, "commit conflict");
            return Ok(CommitOutcome::Conflict);
        }
        let mut updated = current;
        apply_entries(&mut updated, &owner, &entries)?;
        let decorations = serde_json::to_string(&updated.decorations)
            .map_err(|e| corrupt("decorations", e))?;
        let properties =
            serde_json::to_string(&updated.properties).map_err(|e| corrupt("properties", e))?;
        db.execute(
            "UPDATE property_groups
             SET pg_type = ?1, non_persistent = ?2, version = ?3, decorations = ?4, properties = ?5
             WHERE id = ?6",
            params![
                updated.pg_type,
                updated.flags.non_persistent,
                updated.version as i64,
                decorations,
                properties,
                sql_id(pg.id),
            ],
        )
        .map_err(repo_error)?;
        db.commit().map_err(repo_error)?;
        Ok(CommitOutcome::Committed(updated.version))
    }

    fn delete_property_group(&self, pg: &PgRef) -> RepoResult<()> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM property_groups WHERE id = ?1 AND entity_id = ?2",
                params![sql_id(pg.id), sql_id(pg.entity.id)],
            )
            .map_err(repo_error)?;
        if deleted == 0 {
            return Err(RepoError::deleted(format!("{}/{}", pg.entity.fmri, pg.name)));
        }
        Ok(())
    }

    fn take_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<SnapshotRef> {
        if !instance.fmri.is_instance() {
            return Err(RepoError::InvalidName {
                name: format!("{} is not an instance", instance.fmri),
            });
        }
        let tx = self.begin()?;
        Self::live(&tx, instance)?;
        let service_fmri = instance.fmri.service_fmri();
        let (service_id, _) = Self::lookup(&tx, &service_fmri)?
            .ok_or_else(|| RepoError::deleted(service_fmri.to_string()))?;
        let levels = vec![
            Snaplevel {
                entity: service_fmri,
                property_groups: Self::persistent_groups(&tx, service_id)?,
            },
            Snaplevel {
                entity: instance.fmri.clone(),
                property_groups: Self::persistent_groups(&tx, sql_id(instance.id))?,
            },
        ];
        let levels_json = serde_json::to_string(&levels).map_err(|e| corrupt("snaplevels", e))?;
        let digest = compute_checksum(&levels_json);
        let snapshot = SnapshotRef {
            instance: instance.fmri.clone(),
            name: name.to_string(),
            id: Uuid::now_v7().to_string(),
            taken_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO snapshots (id, instance_id, name, taken_at, levels, digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(instance_id, name) DO UPDATE SET
                id = excluded.id,
                taken_at = excluded.taken_at,
                levels = excluded.levels,
                digest = excluded.digest",
            params![
                snapshot.id,
                sql_id(instance.id),
                name,
                snapshot.taken_at.to_rfc3339(),
                levels_json,
                digest,
            ],
        )
        .map_err(repo_error)?;
        tx.commit().map_err(repo_error)?;
        debug!(fmri = %instance.fmri, snapshot = name, digest = %digest, "snapshot stored");
        Ok(snapshot)
    }

    fn get_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<Option<SnapshotRef>> {
        Self::live(&self.conn, instance)?;
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT id, taken_at FROM snapshots WHERE instance_id = ?1 AND name = ?2",
                params![sql_id(instance.id), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(repo_error)?;
        row.map(|(id, taken_at)| Self::snapshot_ref(&instance.fmri, name.to_string(), id, taken_at))
            .transpose()
    }

    fn list_snapshots(&self, instance: &EntityRef) -> RepoResult<Vec<SnapshotRef>> {
        Self::live(&self.conn, instance)?;
        let mut stmt = self
            .conn
            .prepare("SELECT name, id, taken_at FROM snapshots WHERE instance_id = ?1 ORDER BY name")
            .map_err(repo_error)?;
        let rows = stmt
            .query_map([sql_id(instance.id)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(repo_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(repo_error)?;
        rows.into_iter()
            .map(|(name, id, taken_at)| Self::snapshot_ref(&instance.fmri, name, id, taken_at))
            .collect()
    }

    fn list_snaplevels(&self, snapshot: &SnapshotRef) -> RepoResult<Vec<Snaplevel>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT levels, digest FROM snapshots WHERE id = ?1",
                [&snapshot.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(repo_error)?;
        let (levels, digest) = row.ok_or_else(|| {
            RepoError::deleted(format!("snapshot {} of {}", snapshot.name, snapshot.instance))
        })?;
        if compute_checksum(&levels) != digest {
            return Err(RepoError::Backend {
                message: format!("snapshot {} fails its digest check", snapshot.id),
            });
        }
        serde_json::from_str(&levels).map_err(|e| corrupt("snaplevels", e))
    }

    fn refresh(&self, entity: &EntityRef) -> RepoResult<()> {
        Self::live(&self.conn, entity)?;
        self.conn
            .execute(
                "INSERT INTO refresh_log (fmri, requested_at) VALUES (?1, ?2)",
                params![entity.fmri.to_string(), now()],
            )
            .map_err(repo_error)?;
        Ok(())
    }
}
