#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::RefCell;

use svcconf_core::client::{CommitOutcome, EntityRef, PgRef, RepositoryClient, Transaction};
use svcconf_core::errors::RepoResult;
use svcconf_core::model::{
    Decoration, Fmri, PgContents, PgFlags, Snaplevel, SnapshotRef, Value, ValueType,
};
use svcconf_core::{
    Applier, Bundle, ImportOptions, Importer, InstanceDecl, Layer, MemoryRepository, PgDecl,
    PropertyDecl, ReconcileReport, RetryPolicy, SchemaValidator, ServiceDecl,
};

/// Import `bundle`, folding a fatal error into the report
#[allow(dead_code)]
pub fn import(client: &dyn RepositoryClient, bundle: &Bundle) -> ReconcileReport {
    import_with(client, bundle, ImportOptions::default())
}

#[allow(dead_code)]
pub fn import_with(
    client: &dyn RepositoryClient,
    bundle: &Bundle,
    options: ImportOptions,
) -> ReconcileReport {
    let mut report = ReconcileReport::new();
    if let Err(e) = Importer::new(client, options).import(bundle, &mut report) {
        report.fatal = Some(e);
    }
    report
}

#[allow(dead_code)]
pub fn apply(
    client: &dyn RepositoryClient,
    validator: &dyn SchemaValidator,
    profile: &Bundle,
) -> ReconcileReport {
    let mut report = ReconcileReport::new();
    let applier = Applier::new(
        client,
        validator,
        Layer::SitePolicy,
        RetryPolicy::unbounded(),
    );
    if let Err(e) = applier.apply(profile, &mut report) {
        report.fatal = Some(e);
    }
    report
}

#[allow(dead_code)]
pub fn fmri(s: &str) -> Fmri {
    Fmri::parse(s).unwrap()
}

/// `general` group with a boolean `enabled`
#[allow(dead_code)]
pub fn general(enabled: bool) -> PgDecl {
    PgDecl::new("general", "framework").with_property(PropertyDecl::new(
        "enabled",
        ValueType::Boolean,
        [enabled.to_string()],
    ))
}

/// An application group with count-typed properties
#[allow(dead_code)]
pub fn counts(name: &str, props: &[(&str, u64)]) -> PgDecl {
    props.iter().fold(PgDecl::new(name, "application"), |pg, (p, v)| {
        pg.with_property(PropertyDecl::new(*p, ValueType::Count, [v.to_string()]))
    })
}

/// Bundle `source` declaring service `name` with instance `default`
#[allow(dead_code)]
pub fn simple_bundle(name: &str, source: &str, enabled: bool) -> Bundle {
    Bundle::new(name, source).with_service(
        ServiceDecl::new(name)
            .with_instance(InstanceDecl::new("default").with_pg(general(enabled))),
    )
}

#[allow(dead_code)]
pub fn read_pg(repo: &dyn RepositoryClient, fmri_text: &str, pg: &str) -> Option<PgContents> {
    let entity = repo.get_entity(&fmri(fmri_text)).unwrap()?;
    let pg_ref = repo.get_property_group(&entity, pg).unwrap()?;
    Some(repo.read_property_group(&pg_ref).unwrap())
}

#[allow(dead_code)]
pub fn first_value(
    repo: &dyn RepositoryClient,
    fmri_text: &str,
    pg: &str,
    prop: &str,
) -> Option<Value> {
    read_pg(repo, fmri_text, pg).and_then(|c| c.first_value(prop).cloned())
}

/// Write one value at `decoration`'s layer, creating the group if needed
#[allow(dead_code)]
pub fn write_value(
    repo: &dyn RepositoryClient,
    decoration: &Decoration,
    fmri_text: &str,
    pg: &str,
    prop: &str,
    value: Value,
) {
    let (entity, _) = repo.get_or_create(&fmri(fmri_text)).unwrap();
    let pg_ref = match repo.get_property_group(&entity, pg).unwrap() {
        Some(p) => p,
        None => repo
            .add_property_group(&entity, pg, "application", PgFlags::PERSISTENT)
            .unwrap(),
    };
    let mut tx = repo.begin_transaction(&pg_ref, decoration).unwrap();
    tx.set_values(prop, value.value_type(), vec![value]);
    assert!(matches!(repo.commit(tx).unwrap(), CommitOutcome::Committed(_)));
}

/// Remove `decoration`'s layer contribution to one property
#[allow(dead_code)]
pub fn retract_value(
    repo: &dyn RepositoryClient,
    decoration: &Decoration,
    fmri_text: &str,
    pg: &str,
    prop: &str,
) {
    let entity = repo.get_entity(&fmri(fmri_text)).unwrap().unwrap();
    let pg_ref = repo.get_property_group(&entity, pg).unwrap().unwrap();
    let mut tx = repo.begin_transaction(&pg_ref, decoration).unwrap();
    tx.retract(prop);
    assert!(matches!(repo.commit(tx).unwrap(), CommitOutcome::Committed(_)));
}

type Hook = Box<dyn FnOnce(&MemoryRepository)>;

/// Client that runs a competing writer just before the first commit to a
/// chosen property group
#[allow(dead_code)]
pub struct InterferingClient {
    pub inner: MemoryRepository,
    target_pg: String,
    hook: RefCell<Option<Hook>>,
    pub conflicts_seen: RefCell<u32>,
}

#[allow(dead_code)]
impl InterferingClient {
    pub fn new(
        inner: MemoryRepository,
        target_pg: &str,
        hook: impl FnOnce(&MemoryRepository) + 'static,
    ) -> Self {
        Self {
            inner,
            target_pg: target_pg.to_string(),
            hook: RefCell::new(Some(Box::new(hook))),
            conflicts_seen: RefCell::new(0),
        }
    }
}

impl RepositoryClient for InterferingClient {
    fn list_services(&self) -> RepoResult<Vec<EntityRef>> {
        self.inner.list_services()
    }
    fn list_instances(&self, service: &EntityRef) -> RepoResult<Vec<EntityRef>> {
        self.inner.list_instances(service)
    }
    fn get_entity(&self, fmri: &Fmri) -> RepoResult<Option<EntityRef>> {
        self.inner.get_entity(fmri)
    }
    fn create_entity(&self, fmri: &Fmri) -> RepoResult<EntityRef> {
        self.inner.create_entity(fmri)
    }
    fn is_masked(&self, entity: &EntityRef) -> RepoResult<bool> {
        self.inner.is_masked(entity)
    }
    fn delete_entity(&self, entity: &EntityRef) -> RepoResult<()> {
        self.inner.delete_entity(entity)
    }
    fn list_property_groups(&self, entity: &EntityRef) -> RepoResult<Vec<PgRef>> {
        self.inner.list_property_groups(entity)
    }
    fn get_property_group(&self, entity: &EntityRef, name: &str) -> RepoResult<Option<PgRef>> {
        self.inner.get_property_group(entity, name)
    }
    fn add_property_group(
        &self,
        entity: &EntityRef,
        name: &str,
        pg_type: &str,
        flags: PgFlags,
    ) -> RepoResult<PgRef> {
        self.inner.add_property_group(entity, name, pg_type, flags)
    }
    fn read_property_group(&self, pg: &PgRef) -> RepoResult<PgContents> {
        self.inner.read_property_group(pg)
    }
    fn begin_transaction(&self, pg: &PgRef, owner: &Decoration) -> RepoResult<Transaction> {
        self.inner.begin_transaction(pg, owner)
    }
    fn commit(&self, tx: Transaction) -> RepoResult<CommitOutcome> {
        if tx.pg().name == self.target_pg {
            if let Some(hook) = self.hook.borrow_mut().take() {
                hook(&self.inner);
            }
        }
        let outcome = self.inner.commit(tx)?;
        if outcome == CommitOutcome::Conflict {
            *self.conflicts_seen.borrow_mut() += 1;
        }
        Ok(outcome)
    }
    fn delete_property_group(&self, pg: &PgRef) -> RepoResult<()> {
        self.inner.delete_property_group(pg)
    }
    fn take_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<SnapshotRef> {
        self.inner.take_snapshot(instance, name)
    }
    fn get_snapshot(&self, instance: &EntityRef, name: &str) -> RepoResult<Option<SnapshotRef>> {
        self.inner.get_snapshot(instance, name)
    }
    fn list_snapshots(&self, instance: &EntityRef) -> RepoResult<Vec<SnapshotRef>> {
        self.inner.list_snapshots(instance)
    }
    fn list_snaplevels(&self, snapshot: &SnapshotRef) -> RepoResult<Vec<Snaplevel>> {
        self.inner.list_snaplevels(snapshot)
    }
    fn refresh(&self, entity: &EntityRef) -> RepoResult<()> {
        self.inner.refresh(entity)
    }
}
