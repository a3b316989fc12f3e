//! Abstract repository client consumed by the reconciliation engine
//!
//! Every backend (the in-memory repository in [`crate::repo::memory`], the
//! SQLite store, a remote daemon) implements [`RepositoryClient`]. The engine
//! never sees anything else of the backend.
//!
//! Contract:
//! - property-group writes happen only through `begin_transaction` +
//!   `commit`, and a commit applies all of its entries or none of them
//! - `commit` reports [`CommitOutcome::Conflict`] when the group changed
//!   after the transaction began
//! - refs carry backend ids, so a name deleted and re-created is detected
//!   as [`RepoError::Deleted`](crate::errors::RepoError::Deleted)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::{RepoError, RepoResult};
use crate::model::{
    Decoration, Fmri, PgContents, PgFlags, PropertyContents, Snaplevel, SnapshotRef, Value,
    ValueType,
};

/// Handle to a live service or instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub fmri: Fmri,
    /// Backend identity; differs after delete and re-create
    pub id: u64,
}

/// Handle to a live property group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PgRef {
    pub entity: EntityRef,
    pub name: String,
    pub id: u64,
}

/// One queued change inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEntry {
    /// Start the owner layer's contribution; fails if that layer already has one
    New {
        property: String,
        value_type: ValueType,
    },
    /// Reset the owner layer's contribution to an empty one of a new type
    ChangeType {
        property: String,
        value_type: ValueType,
    },
    /// Append a value to the owner layer's contribution
    AddValue { property: String, value: Value },
    /// Remove the owner layer's contribution, leaving other layers intact
    Retract { property: String },
    /// Replace a property verbatim, every layer included
    CopyProperty(PropertyContents),
    ModifyGroup { pg_type: String, flags: PgFlags },
    /// Replace the group's decoration set verbatim
    CopyDecorations(BTreeSet<Decoration>),
    /// Drop the owner's decoration from the group
    Undecorate,
}

impl TxEntry {
    /// Entries that mark the group as written by the transaction owner
    pub fn decorates(&self) -> bool {
        matches!(
            self,
            TxEntry::New { .. }
                | TxEntry::ChangeType { .. }
                | TxEntry::AddValue { .. }
                | TxEntry::ModifyGroup { .. }
        )
    }
}

/// A pending set of changes to one property group
///
/// Carries the contents the transaction was opened against; builders plan
/// their entries from [`Transaction::base`].
#[derive(Debug, Clone)]
pub struct Transaction {
    pg: PgRef,
    owner: Decoration,
    base: PgContents,
    entries: Vec<TxEntry>,
}

impl Transaction {
    pub fn new(pg: PgRef, owner: Decoration, base: PgContents) -> Self {
        Self {
            pg,
            owner,
            base,
            entries: Vec::new(),
        }
    }

    pub fn pg(&self) -> &PgRef {
        &self.pg
    }

    pub fn owner(&self) -> &Decoration {
        &self.owner
    }

    pub fn base(&self) -> &PgContents {
        &self.base
    }

    pub fn entries(&self) -> &[TxEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: TxEntry) {
        self.entries.push(entry);
    }

    pub fn new_property(&mut self, property: &str, value_type: ValueType) {
        self.push(TxEntry::New {
            property: property.to_string(),
            value_type,
        });
    }

    pub fn change_type(&mut self, property: &str, value_type: ValueType) {
        self.push(TxEntry::ChangeType {
            property: property.to_string(),
            value_type,
        });
    }

    pub fn add_value(&mut self, property: &str, value: Value) {
        self.push(TxEntry::AddValue {
            property: property.to_string(),
            value,
        });
    }

    /// Replace the owner layer's contribution with `values`
    pub fn set_values(&mut self, property: &str, value_type: ValueType, values: Vec<Value>) {
        let exists = self
            .base
            .property(property)
            .is_some_and(|p| p.contribution(self.owner.layer).is_some());
        if exists {
            self.change_type(property, value_type);
        } else {
            self.new_property(property, value_type);
        }
        for value in values {
            self.add_value(property, value);
        }
    }

    pub fn retract(&mut self, property: &str) {
        self.push(TxEntry::Retract {
            property: property.to_string(),
        });
    }

    pub fn modify_group(&mut self, pg_type: &str, flags: PgFlags) {
        self.push(TxEntry::ModifyGroup {
            pg_type: pg_type.to_string(),
            flags,
        });
    }

    pub fn into_parts(self) -> (PgRef, Decoration, PgContents, Vec<TxEntry>) {
        (self.pg, self.owner, self.base, self.entries)
    }
}

/// Result of a commit that reached the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Applied; carries the group's new version
    Committed(u64),
    /// Another writer changed the group after the transaction began
    Conflict,
}

/// Repository operations required by the reconciliation engine
///
/// Methods take `&self`; backends use interior mutability. Every method may
/// fail with [`RepoError::Unreachable`].
pub trait RepositoryClient {
    fn list_services(&self) -> RepoResult<Vec<EntityRef>>;

    fn list_instances(&self, service: &EntityRef) -> RepoResult<Vec<EntityRef>>;

    fn get_entity(&self, fmri: &Fmri) -> RepoResult<Option<EntityRef>>;

    /// Create a service, or an instance of an existing service
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the entity exists, `NotFound` if an instance's
    /// service does not.
    fn create_entity(&self, fmri: &Fmri) -> RepoResult<EntityRef>;

    /// Look up an entity, creating it if absent
    ///
    /// Returns whether this call created it. A racing creator is adopted.
    fn get_or_create(&self, fmri: &Fmri) -> RepoResult<(EntityRef, bool)> {
        if let Some(entity) = self.get_entity(fmri)? {
            return Ok((entity, false));
        }
        match self.create_entity(fmri) {
            Ok(entity) => Ok((entity, true)),
            Err(RepoError::AlreadyExists { .. }) => self
                .get_entity(fmri)?
                .map(|e| (e, false))
                .ok_or_else(|| RepoError::deleted(fmri.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Whether an administrator masked the entity
    fn is_masked(&self, entity: &EntityRef) -> RepoResult<bool>;

    /// Delete an entity with its groups, instances and snapshots
    fn delete_entity(&self, entity: &EntityRef) -> RepoResult<()>;

    fn list_property_groups(&self, entity: &EntityRef) -> RepoResult<Vec<PgRef>>;

    fn get_property_group(&self, entity: &EntityRef, name: &str) -> RepoResult<Option<PgRef>>;

    /// # Errors
    ///
    /// `AlreadyExists` if the entity already has a group of that name.
    fn add_property_group(
        &self,
        entity: &EntityRef,
        name: &str,
        pg_type: &str,
        flags: PgFlags,
    ) -> RepoResult<PgRef>;

    fn read_property_group(&self, pg: &PgRef) -> RepoResult<PgContents>;

    /// Open a transaction on behalf of `owner`
    ///
    /// # Errors
    ///
    /// `Deleted` if the group is gone since `pg` was obtained.
    fn begin_transaction(&self, pg: &PgRef, owner: &Decoration) -> RepoResult<Transaction>;

    fn commit(&self, tx: Transaction) -> RepoResult<CommitOutcome>;

    fn delete_property_group(&self, pg: &PgRef) -> RepoResult<()>;

    /// Take or atomically replace the named snapshot of an instance
    fn take_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<SnapshotRef>;

    fn get_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<Option<SnapshotRef>>;

    fn list_snapshots(&self, instance: &EntityRef) -> RepoResult<Vec<SnapshotRef>>;

    /// Levels of a snapshot, service level first
    fn list_snaplevels(&self, snapshot: &SnapshotRef) -> RepoResult<Vec<Snaplevel>>;

    /// Ask the live system to pick up the persisted state of an entity
    fn refresh(&self, entity: &EntityRef) -> RepoResult<()>;
}

/// Opens repository clients
pub trait Connector {
    type Client: RepositoryClient;

    /// # Errors
    ///
    /// `Unreachable` when the backend cannot be reached, or whatever the
    /// backend reports while preparing its storage.
    fn connect(&self) -> crate::errors::Result<Self::Client>;
}
