//! In-process repository backend
//!
//! `MemoryRepository` keeps the whole scope behind one mutex and shares it
//! between clones, so a clone handed to a second engine is a second writer
//! against the same repository. Faults can be injected per operation for
//! exercising the engine's error handling.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::txn::apply_entries;
use crate::client::{CommitOutcome, Connector, EntityRef, PgRef, RepositoryClient, Transaction};
use crate::errors::{RepoError, RepoResult};
use crate::model::{Decoration, Fmri, PgContents, PgFlags, Snaplevel, SnapshotRef};

/// Repository operation a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Any,
    ListServices,
    ListInstances,
    GetEntity,
    CreateEntity,
    DeleteEntity,
    IsMasked,
    ListPropertyGroups,
    GetPropertyGroup,
    AddPropertyGroup,
    ReadPropertyGroup,
    BeginTransaction,
    Commit,
    DeletePropertyGroup,
    TakeSnapshot,
    ListSnapshots,
    ListSnaplevels,
    Refresh,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    target: Option<Fmri>,
    error: RepoError,
    persistent: bool,
    /// Matching calls let through before the fault fires
    skip: u32,
}

#[derive(Debug, Clone)]
struct StoredPg {
    id: u64,
    contents: PgContents,
}

#[derive(Debug, Clone)]
struct EntityNode {
    id: u64,
    masked: bool,
    pgs: BTreeMap<String, StoredPg>,
}

impl EntityNode {
    fn new(id: u64) -> Self {
        Self {
            id,
            masked: false,
            pgs: BTreeMap::new(),
        }
    }

    fn persistent_groups(&self) -> Vec<PgContents> {
        self.pgs
            .values()
            .filter(|p| p.contents.is_persistent())
            .map(|p| p.contents.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct StoredSnapshot {
    reference: SnapshotRef,
    levels: Vec<Snaplevel>,
}

#[derive(Debug, Clone)]
struct InstanceNode {
    entity: EntityNode,
    snapshots: BTreeMap<String, StoredSnapshot>,
}

#[derive(Debug, Clone)]
struct ServiceNode {
    entity: EntityNode,
    instances: BTreeMap<String, InstanceNode>,
}

#[derive(Debug, Default)]
struct MemState {
    next_id: u64,
    services: BTreeMap<String, ServiceNode>,
    refreshes: Vec<Fmri>,
    faults: Vec<Fault>,
    unreachable: bool,
    commits: u64,
}

impl MemState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&mut self, op: FaultOp, target: Option<&Fmri>) -> RepoResult<()> {
        if self.unreachable {
            return Err(RepoError::Unreachable {
                reason: "memory repository disconnected".to_string(),
            });
        }
        let hit = self.faults.iter().position(|f| {
            (f.op == FaultOp::Any || f.op == op)
                && f.target.as_ref().map_or(true, |t| Some(t) == target)
        });
        match hit {
            Some(index) if self.faults[index].skip > 0 => {
                self.faults[index].skip -= 1;
                Ok(())
            }
            Some(index) => {
                let fault = if self.faults[index].persistent {
                    self.faults[index].clone()
                } else {
                    self.faults.remove(index)
                };
                Err(fault.error)
            }
            None => Ok(()),
        }
    }

    fn entity(&self, fmri: &Fmri) -> Option<&EntityNode> {
        let service = self.services.get(fmri.service_name())?;
        match fmri.instance_name() {
            None => Some(&service.entity),
            Some(name) => service.instances.get(name).map(|i| &i.entity),
        }
    }

    fn entity_mut(&mut self, fmri: &Fmri) -> Option<&mut EntityNode> {
        let service = self.services.get_mut(fmri.service_name())?;
        match fmri.instance_name() {
            None => Some(&mut service.entity),
            Some(name) => service.instances.get_mut(name).map(|i| &mut i.entity),
        }
    }

    /// The node `entity` refers to, unless it was deleted since
    fn node(&self, entity: &EntityRef) -> RepoResult<&EntityNode> {
        self.entity(&entity.fmri)
            .filter(|n| n.id == entity.id)
            .ok_or_else(|| RepoError::deleted(entity.fmri.to_string()))
    }

    fn node_mut(&mut self, entity: &EntityRef) -> RepoResult<&mut EntityNode> {
        self.entity_mut(&entity.fmri)
            .filter(|n| n.id == entity.id)
            .ok_or_else(|| RepoError::deleted(entity.fmri.to_string()))
    }

    fn stored_pg(&self, pg: &PgRef) -> RepoResult<&StoredPg> {
        self.node(&pg.entity)?
            .pgs
            .get(&pg.name)
            .filter(|s| s.id == pg.id)
            .ok_or_else(|| RepoError::deleted(format!("{}/{}", pg.entity.fmri, pg.name)))
    }

    fn instance_node_mut(&mut self, instance: &EntityRef) -> RepoResult<&mut InstanceNode> {
        let deleted = || RepoError::deleted(instance.fmri.to_string());
        let name = instance.fmri.instance_name().ok_or_else(|| RepoError::InvalidName {
            name: format!("{} is not an instance", instance.fmri),
        })?;
        self.services
            .get_mut(instance.fmri.service_name())
            .and_then(|s| s.instances.get_mut(name))
            .filter(|i| i.entity.id == instance.id)
            .ok_or_else(deleted)
    }

    fn instance_node(&self, instance: &Fmri) -> RepoResult<&InstanceNode> {
        let name = instance.instance_name().ok_or_else(|| RepoError::InvalidName {
            name: format!("{} is not an instance", instance),
        })?;
        self.services
            .get(instance.service_name())
            .and_then(|s| s.instances.get(name))
            .ok_or_else(|| RepoError::deleted(instance.to_string()))
    }
}

/// Shared-state in-memory repository
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<MemState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> RepoResult<MutexGuard<'_, MemState>> {
        self.state.lock().map_err(|_| RepoError::Backend {
            message: "memory repository lock poisoned".to_string(),
        })
    }

    /// Make every subsequent call fail with `Unreachable`
    ///
    /// # Errors
    ///
    /// `Backend` if the state lock is poisoned, as for every method
    /// here.
    pub fn set_unreachable(&self, unreachable: bool) -> RepoResult<()> {
        self.state()?.unreachable = unreachable;
        Ok(())
    }

    /// Fail the next matching call (or every one, if `persistent`)
    ///
    /// `target` restricts the fault to calls about one entity.
    pub fn inject_fault(
        &self,
        op: FaultOp,
        target: Option<Fmri>,
        error: RepoError,
        persistent: bool,
    ) -> RepoResult<()> {
        self.state()?.faults.push(Fault {
            op,
            target,
            error,
            persistent,
            skip: 0,
        });
        Ok(())
    }

    /// Fail the matching call that follows `skip` successful ones, once
    pub fn inject_fault_after(
        &self,
        op: FaultOp,
        target: Option<Fmri>,
        error: RepoError,
        skip: u32,
    ) -> RepoResult<()> {
        self.state()?.faults.push(Fault {
            op,
            target,
            error,
            persistent: false,
            skip,
        });
        Ok(())
    }

    pub fn clear_faults(&self) -> RepoResult<()> {
        self.state()?.faults.clear();
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown entity.
    pub fn set_masked(&self, fmri: &Fmri, masked: bool) -> RepoResult<()> {
        let mut state = self.state()?;
        let node = state
            .entity_mut(fmri)
            .ok_or_else(|| RepoError::not_found(fmri.to_string()))?;
        node.masked = masked;
        Ok(())
    }

    /// Entities refreshed so far, in call order
    pub fn refresh_log(&self) -> RepoResult<Vec<Fmri>> {
        Ok(self.state()?.refreshes.clone())
    }

    /// Number of commits that changed a group
    pub fn commit_count(&self) -> RepoResult<u64> {
        Ok(self.state()?.commits)
    }

    /// Every entity with all its groups, for comparing repository states
    pub fn dump(&self) -> RepoResult<BTreeMap<Fmri, Vec<PgContents>>> {
        let state = self.state()?;
        let mut out = BTreeMap::new();
        let groups = |node: &EntityNode| -> Vec<PgContents> {
            node.pgs.values().map(|p| p.contents.clone()).collect()
        };
        for (name, service) in &state.services {
            let fmri = Fmri::service(name)?;
            for (inst, node) in &service.instances {
                out.insert(fmri.child(inst)?, groups(&node.entity));
            }
            out.insert(fmri, groups(&service.entity));
        }
        Ok(out)
    }
}

impl RepositoryClient for MemoryRepository {
    fn list_services(&self) -> RepoResult<Vec<EntityRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::ListServices, None)?;
        state
            .services
            .iter()
            .map(|(name, s)| {
                Ok(EntityRef {
                    fmri: Fmri::service(name)?,
                    id: s.entity.id,
                })
            })
            .collect()
    }

    fn list_instances(&self, service: &EntityRef) -> RepoResult<Vec<EntityRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::ListInstances, Some(&service.fmri))?;
        let node = state
            .services
            .get(service.fmri.service_name())
            .filter(|s| s.entity.id == service.id && !service.fmri.is_instance())
            .ok_or_else(|| RepoError::deleted(service.fmri.to_string()))?;
        node.instances
            .iter()
            .map(|(name, i)| {
                Ok(EntityRef {
                    fmri: service.fmri.child(name)?,
                    id: i.entity.id,
                })
            })
            .collect()
    }

    fn get_entity(&self, fmri: &Fmri) -> RepoResult<Option<EntityRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::GetEntity, Some(fmri))?;
        Ok(state.entity(fmri).map(|n| EntityRef {
            fmri: fmri.clone(),
            id: n.id,
        }))
    }

    fn create_entity(&self, fmri: &Fmri) -> RepoResult<EntityRef> {
        let mut state = self.state()?;
        state.check(FaultOp::CreateEntity, Some(fmri))?;
        if state.entity(fmri).is_some() {
            return Err(RepoError::already_exists(fmri.to_string()));
        }
        let id = state.allocate_id();
        match fmri.instance_name() {
            None => {
                state.services.insert(
                    fmri.service_name().to_string(),
                    ServiceNode {
                        entity: EntityNode::new(id),
                        instances: BTreeMap::new(),
                    },
                );
            }
            Some(name) => {
                let service = state
                    .services
                    .get_mut(fmri.service_name())
                    .ok_or_else(|| RepoError::not_found(fmri.service_fmri().to_string()))?;
                service.instances.insert(
                    name.to_string(),
                    InstanceNode {
                        entity: EntityNode::new(id),
                        snapshots: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(EntityRef {
            fmri: fmri.clone(),
            id,
        })
    }

    fn is_masked(&self, entity: &EntityRef) -> RepoResult<bool> {
        let mut state = self.state()?;
        state.check(FaultOp::IsMasked, Some(&entity.fmri))?;
        Ok(state.node(entity)?.masked)
    }

    fn delete_entity(&self, entity: &EntityRef) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check(FaultOp::DeleteEntity, Some(&entity.fmri))?;
        state.node(entity)?;
        let service = entity.fmri.service_name();
        match entity.fmri.instance_name() {
            None => {
                state.services.remove(service);
            }
            Some(name) => {
                if let Some(s) = state.services.get_mut(service) {
                    s.instances.remove(name);
                }
            }
        }
        Ok(())
    }

    fn list_property_groups(&self, entity: &EntityRef) -> RepoResult<Vec<PgRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::ListPropertyGroups, Some(&entity.fmri))?;
        Ok(state
            .node(entity)?
            .pgs
            .iter()
            .map(|(name, stored)| PgRef {
                entity: entity.clone(),
                name: name.clone(),
                id: stored.id,
            })
            .collect())
    }

    fn get_property_group(&self, entity: &EntityRef, name: &str) -> RepoResult<Option<PgRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::GetPropertyGroup, Some(&entity.fmri))?;
        Ok(state.node(entity)?.pgs.get(name).map(|stored| PgRef {
            entity: entity.clone(),
            name: name.to_string(),
            id: stored.id,
        }))
    }

    fn add_property_group(
        &self,
        entity: &EntityRef,
        name: &str,
        pg_type: &str,
        flags: PgFlags,
    ) -> RepoResult<PgRef> {
        crate::model::names::validate_simple_name(name)?;
        let mut state = self.state()?;
        state.check(FaultOp::AddPropertyGroup, Some(&entity.fmri))?;
        let id = state.allocate_id();
        let node = state.node_mut(entity)?;
        if node.pgs.contains_key(name) {
            return Err(RepoError::already_exists(format!("{}/{}", entity.fmri, name)));
        }
        node.pgs.insert(
            name.to_string(),
            StoredPg {
                id,
                contents: PgContents::new(name, pg_type, flags),
            },
        );
        Ok(PgRef {
            entity: entity.clone(),
            name: name.to_string(),
            id,
        })
    }

    fn read_property_group(&self, pg: &PgRef) -> RepoResult<PgContents> {
        let mut state = self.state()?;
        state.check(FaultOp::ReadPropertyGroup, Some(&pg.entity.fmri))?;
        Ok(state.stored_pg(pg)?.contents.clone())
    }

    fn begin_transaction(&self, pg: &PgRef, owner: &Decoration) -> RepoResult<Transaction> {
        let mut state = self.state()?;
        state.check(FaultOp::BeginTransaction, Some(&pg.entity.fmri))?;
        let base = state.stored_pg(pg)?.contents.clone();
        Ok(Transaction::new(pg.clone(), owner.clone(), base))
    }

    fn commit(&self, tx: Transaction) -> RepoResult<CommitOutcome> {
        let mut state = self.state()?;
        state.check(FaultOp::Commit, Some(&tx.pg().entity.fmri))?;
        let (pg, owner, base, entries) = tx.into_parts();
        let current = &state.stored_pg(&pg)?.contents;
        if current.version != base.version {
            return Ok(CommitOutcome::Conflict);
        }
        let mut updated = current.clone();
        apply_entries(&mut updated, &owner, &entries)?;
        let version = updated.version;
        let node = state.node_mut(&pg.entity)?;
        if let Some(stored) = node.pgs.get_mut(&pg.name) {
            stored.contents = updated;
        }
        state.commits += 1;
        Ok(CommitOutcome::Committed(version))
    }

    fn delete_property_group(&self, pg: &PgRef) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check(FaultOp::DeletePropertyGroup, Some(&pg.entity.fmri))?;
        state.stored_pg(pg)?;
        state.node_mut(&pg.entity)?.pgs.remove(&pg.name);
        Ok(())
    }

    fn take_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<SnapshotRef> {
        let mut state = self.state()?;
        state.check(FaultOp::TakeSnapshot, Some(&instance.fmri))?;
        let service_fmri = instance.fmri.service_fmri();
        let service_groups = state
            .entity(&service_fmri)
            .map(EntityNode::persistent_groups)
            .ok_or_else(|| RepoError::deleted(service_fmri.to_string()))?;
        let node = state.instance_node_mut(instance)?;
        let levels = vec![
            Snaplevel {
                entity: service_fmri,
                property_groups: service_groups,
            },
            Snaplevel {
                entity: instance.fmri.clone(),
                property_groups: node.entity.persistent_groups(),
            },
        ];
        let reference = SnapshotRef {
            instance: instance.fmri.clone(),
            name: name.to_string(),
            id: Uuid::new_v4().to_string(),
            taken_at: Utc::now(),
        };
        node.snapshots.insert(
            name.to_string(),
            StoredSnapshot {
                reference: reference.clone(),
                levels,
            },
        );
        Ok(reference)
    }

    fn get_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<Option<SnapshotRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::ListSnapshots, Some(&instance.fmri))?;
        let node = state.instance_node_mut(instance)?;
        Ok(node.snapshots.get(name).map(|s| s.reference.clone()))
    }

    fn list_snapshots(&self, instance: &EntityRef) -> RepoResult<Vec<SnapshotRef>> {
        let mut state = self.state()?;
        state.check(FaultOp::ListSnapshots, Some(&instance.fmri))?;
        let node = state.instance_node_mut(instance)?;
        Ok(node
            .snapshots
            .values()
            .map(|s| s.reference.clone())
            .collect())
    }

    fn list_snaplevels(&self, snapshot: &SnapshotRef) -> RepoResult<Vec<Snaplevel>> {
        let mut state = self.state()?;
        state.check(FaultOp::ListSnaplevels, Some(&snapshot.instance))?;
        state
            .instance_node(&snapshot.instance)?
            .snapshots
            .get(&snapshot.name)
            .filter(|s| s.reference.id == snapshot.id)
            .map(|s| s.levels.clone())
            .ok_or_else(|| {
                RepoError::deleted(format!("{} snapshot {}", snapshot.instance, snapshot.name))
            })
    }

    fn refresh(&self, entity: &EntityRef) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check(FaultOp::Refresh, Some(&entity.fmri))?;
        state.node(entity)?;
        state.refreshes.push(entity.fmri.clone());
        Ok(())
    }
}

/// Connector handing out clones of one shared repository
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    repo: MemoryRepository,
}

impl MemoryConnector {
    pub fn new(repo: MemoryRepository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &MemoryRepository {
        &self.repo
    }
}

impl Connector for MemoryConnector {
    type Client = MemoryRepository;

    fn connect(&self) -> crate::errors::Result<MemoryRepository> {
        if self.repo.state()?.unreachable {
            return Err(RepoError::Unreachable {
                reason: "memory repository disconnected".to_string(),
            }
            .into());
        }
        Ok(self.repo.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Value, ValueType};

    fn svc(name: &str) -> Fmri {
        Fmri::service(name).unwrap()
    }

    #[test]
    fn test_create_and_get_or_create() {
        let repo = MemoryRepository::new();
        let (s, created) = repo.get_or_create(&svc("app")).unwrap();
        assert!(created);
        let (again, created) = repo.get_or_create(&svc("app")).unwrap();
        assert!(!created);
        assert_eq!(s, again);

        let err = repo.create_entity(&svc("app")).unwrap_err();
        assert!(matches!(err, RepoError::AlreadyExists { .. }));

        let orphan = Fmri::instance("missing", "default").unwrap();
        assert!(matches!(
            repo.create_entity(&orphan),
            Err(RepoError::NotFound { .. })
        ));
    }

    #[test]
    fn test_commit_conflicts_on_stale_version() {
        let repo = MemoryRepository::new();
        let (s, _) = repo.get_or_create(&svc("app")).unwrap();
        let pg = repo
            .add_property_group(&s, "config", "application", PgFlags::PERSISTENT)
            .unwrap();
        let owner = Decoration::manifest("a.json");

        let mut first = repo.begin_transaction(&pg, &owner).unwrap();
        let mut second = repo.begin_transaction(&pg, &owner).unwrap();
        first.set_values("a", ValueType::Count, vec![Value::Count(1)]);
        second.set_values("b", ValueType::Count, vec![Value::Count(2)]);

        assert_eq!(repo.commit(first).unwrap(), CommitOutcome::Committed(1));
        assert_eq!(repo.commit(second).unwrap(), CommitOutcome::Conflict);
        assert!(repo
            .read_property_group(&pg)
            .unwrap()
            .property("b")
            .is_none());
    }

    #[test]
    fn test_recreated_group_is_detected_as_deleted() {
        let repo = MemoryRepository::new();
        let (s, _) = repo.get_or_create(&svc("app")).unwrap();
        let old = repo
            .add_property_group(&s, "config", "application", PgFlags::PERSISTENT)
            .unwrap();
        repo.delete_property_group(&old).unwrap();
        repo.add_property_group(&s, "config", "application", PgFlags::PERSISTENT)
            .unwrap();

        let err = repo
            .begin_transaction(&old, &Decoration::manifest("a.json"))
            .unwrap_err();
        assert!(matches!(err, RepoError::Deleted { .. }));
    }

    #[test]
    fn test_snapshot_excludes_non_persistent_groups() {
        let repo = MemoryRepository::new();
        let (s, _) = repo.get_or_create(&svc("app")).unwrap();
        let (i, _) = repo
            .get_or_create(&s.fmri.child("default").unwrap())
            .unwrap();
        repo.add_property_group(&s, "config", "application", PgFlags::PERSISTENT)
            .unwrap();
        repo.add_property_group(&i, "restarter", "framework", PgFlags::NON_PERSISTENT)
            .unwrap();

        let snap = repo.take_snapshot(&i, "initial").unwrap();
        let levels = repo.list_snaplevels(&snap).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].entity, s.fmri);
        assert_eq!(levels[0].property_groups.len(), 1);
        assert!(levels[1].property_groups.is_empty());

        let retaken = repo.take_snapshot(&i, "initial").unwrap();
        assert_ne!(retaken.id, snap.id);
        assert_eq!(repo.list_snapshots(&i).unwrap().len(), 1);
        assert!(matches!(
            repo.list_snaplevels(&snap),
            Err(RepoError::Deleted { .. })
        ));
    }

    #[test]
    fn test_one_shot_and_persistent_faults() {
        let repo = MemoryRepository::new();
        repo.inject_fault(FaultOp::ListServices, None, RepoError::NoResources, false)
            .unwrap();
        assert!(matches!(repo.list_services(), Err(RepoError::NoResources)));
        assert!(repo.list_services().is_ok());

        repo.set_unreachable(true).unwrap();
        assert!(matches!(
            repo.list_services(),
            Err(RepoError::Unreachable { .. })
        ));
        assert!(MemoryConnector::new(repo.clone()).connect().is_err());
    }
}
