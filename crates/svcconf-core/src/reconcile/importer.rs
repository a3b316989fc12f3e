//! Manifest import: reconciling a bundle into the repository
//!
//! Per service:
//! 1. reset a masked service, or create a missing one
//! 2. for an existing service, take "previous" of every instance, creating
//!    the bundle's new instances first
//! 3. process groups the bundle no longer declares
//! 4. write every declared group, one transaction each
//! 5. materialize dependents, then any held-back `general/enabled`
//! 6. repeat 1 and 3-5 per instance; the first clean import takes "initial"

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::absorb_failure;
use crate::bundle::{Bundle, DependentDecl, InstanceDecl, PgDecl, ServiceDecl};
use crate::client::{EntityRef, RepositoryClient};
use crate::errors::{Disposition, ExError, Result};
use crate::model::wellknown::{
    PG_DEPENDENTS, PG_GENERAL, PROP_ENABLED, SNAPSHOT_INITIAL, SNAPSHOT_PREVIOUS, SNAPSHOT_RUNNING,
};
use crate::model::{Decoration, Fmri};
use crate::policy::ImportOptions;
use crate::reconcile::cleanup::CleanupScanner;
use crate::reconcile::dependency::DependencyResolver;
use crate::reconcile::pg_write::{PgWriter, ResolvedPg, WriteMode};
use crate::reconcile::report::{Progress, ReconcileReport};
use crate::reconcile::snapshot::SnapshotManager;

/// Service-level facts the instance pass needs
struct ServiceState {
    entity: EntityRef,
    created: bool,
    existing_instances: Vec<EntityRef>,
    /// Instances created during the "previous" snapshot pass
    fresh_instances: BTreeSet<Fmri>,
}

pub struct Importer<'a> {
    client: &'a dyn RepositoryClient,
    options: ImportOptions,
}

impl<'a> Importer<'a> {
    pub fn new(client: &'a dyn RepositoryClient, options: ImportOptions) -> Self {
        Self { client, options }
    }

    fn writer(&self) -> PgWriter<'a> {
        PgWriter::new(self.client, self.options.retry)
    }

    fn snapshots(&self) -> SnapshotManager<'a> {
        SnapshotManager::new(self.client, self.options.retry)
    }

    fn dependencies(&self) -> DependencyResolver<'a> {
        DependencyResolver::new(self.client, self.options.retry)
    }

    fn cleanup(&self) -> CleanupScanner<'a> {
        CleanupScanner::new(self.client, self.options.retry)
    }

    /// Import every service of `bundle`, recording progress in `report`
    ///
    /// # Errors
    ///
    /// Only errors whose kind is fatal, such as `Unreachable` or
    /// `OutOfResources`; the report then shows how far each entity got.
    pub fn import(&self, bundle: &Bundle, report: &mut ReconcileReport) -> Result<()> {
        let owner = Decoration::manifest(&bundle.source);
        for service in &bundle.services {
            if let Ok(fmri) = Fmri::service(&service.name) {
                report.entry_mut(&fmri);
                for instance in &service.instances {
                    if let Ok(child) = fmri.child(&instance.name) {
                        report.entry_mut(&child);
                    }
                }
            }
        }
        for service in &bundle.services {
            self.import_service(service, &owner, report)?;
        }
        Ok(())
    }

    fn import_service(
        &self,
        decl: &ServiceDecl,
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let fmri = match decl.fmri() {
            Ok(f) => f,
            Err(e) => {
                warn!(service = %decl.name, "rejected service: {}", e);
                report.rejected.push(e);
                return Ok(());
            }
        };
        let state = match self.service_pass(&fmri, decl, owner, report) {
            Ok(state) => state,
            // A failed service skips its instances
            Err(e) => return absorb_failure(report, &fmri, e),
        };
        for instance in &decl.instances {
            self.import_instance(&state, instance, owner, report)?;
        }
        self.refresh_unlisted(&state, decl)
    }

    fn service_pass(
        &self,
        fmri: &Fmri,
        decl: &ServiceDecl,
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<ServiceState> {
        let (entity, created) = self.lookup_or_reset(fmri)?;
        report.entry_mut(fmri).created = created;

        let mut existing_instances = Vec::new();
        let mut fresh_instances = BTreeSet::new();
        if !created {
            existing_instances = self.client.list_instances(&entity)?;
            for instance in &existing_instances {
                self.take_previous(instance, report)?;
            }
            for instance in &decl.instances {
                let Ok(child) = fmri.child(&instance.name) else {
                    continue;
                };
                if existing_instances.iter().any(|e| e.fmri == child) {
                    continue;
                }
                let (inst, made) = match self.client.get_or_create(&child) {
                    Ok(r) => r,
                    Err(e) => {
                        absorb_failure(report, &child, e.into())?;
                        continue;
                    }
                };
                if made {
                    fresh_instances.insert(child.clone());
                    report.entry_mut(&child).created = true;
                }
                self.take_previous(&inst, report)?;
            }
            report
                .entry_mut(fmri)
                .advance(Progress::PreviousSnapshotTaken);
        }

        let general = self.import_groups(
            &entity,
            &decl.property_groups,
            &decl.dependents,
            owner,
            report,
        )?;
        if let Some(general) = general {
            self.writer()
                .write(&entity, &general, owner, WriteMode::Merge, &[])?;
        }
        report.entry_mut(fmri).advance(Progress::Imported);
        info!(fmri = %fmri, created, "service imported");

        Ok(ServiceState {
            entity,
            created,
            existing_instances,
            fresh_instances,
        })
    }

    fn take_previous(&self, instance: &EntityRef, report: &mut ReconcileReport) -> Result<()> {
        match self.snapshots().take(instance, SNAPSHOT_PREVIOUS) {
            Ok(Some(_)) => {
                if report.entry(&instance.fmri).is_some() {
                    report
                        .entry_mut(&instance.fmri)
                        .advance(Progress::PreviousSnapshotTaken);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => absorb_failure(report, &instance.fmri, e),
        }
    }

    /// Look an entity up; a masked one is deleted and created afresh
    fn lookup_or_reset(&self, fmri: &Fmri) -> Result<(EntityRef, bool)> {
        if let Some(existing) = self.client.get_entity(fmri)? {
            if !self.client.is_masked(&existing)? {
                return Ok((existing, false));
            }
            info!(fmri = %fmri, "entity is masked; resetting it");
            self.client.delete_entity(&existing)?;
        }
        Ok(self.client.get_or_create(fmri)?)
    }

    /// Steps 3-5 for one entity
    ///
    /// Returns the held-back `general` group when delayed enable is on.
    fn import_groups(
        &self,
        entity: &EntityRef,
        pgs: &[PgDecl],
        dependents: &[DependentDecl],
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<Option<ResolvedPg>> {
        let fmri = &entity.fmri;
        let dependencies = self.dependencies();
        let previous_record = dependencies.read_record(entity)?;

        let mut declared: BTreeSet<String> = pgs.iter().map(|p| p.name.clone()).collect();
        let mut resolved = Vec::new();
        for decl in pgs {
            match ResolvedPg::from_decl(decl) {
                Ok(pg) => resolved.push(pg),
                Err(e) => {
                    warn!(fmri = %fmri, pg = %decl.name, "skipping property group: {}", e);
                    report
                        .entry_mut(fmri)
                        .failures
                        .push(e.or_entity(fmri.to_string()));
                }
            }
        }
        if let Some(record) = DependencyResolver::record_group(dependents) {
            declared.insert(PG_DEPENDENTS.to_string());
            resolved.push(record);
        }

        let cleaned = self.cleanup().process_old_groups(entity, &declared, owner)?;
        if !cleaned.is_empty() {
            debug!(fmri = %fmri, deleted = cleaned.deleted_groups.len(), "old groups processed");
        }

        let mut held_general = None;
        let writer = self.writer();
        for pg in &mut resolved {
            let mut held: &[&str] = &[];
            if self.options.delayed_enable && pg.name == PG_GENERAL {
                if let Some(enabled) = pg.take_property(PROP_ENABLED) {
                    held = &[PROP_ENABLED];
                    held_general = Some(
                        ResolvedPg::new(&pg.name, &pg.pg_type, pg.flags).with_property(enabled),
                    );
                }
            }
            match writer.write(entity, pg, owner, WriteMode::Import, held) {
                Ok(_) => report
                    .entry_mut(fmri)
                    .advance(Progress::SomePropertiesImported),
                Err(e) if e.disposition() == Disposition::Structural => {
                    warn!(fmri = %fmri, pg = %pg.name, "property group rejected: {}", e);
                    report.entry_mut(fmri).failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        report.entry_mut(fmri).advance(Progress::PropertiesImported);

        let outcomes = dependencies.resolve_all(
            fmri,
            dependents,
            &previous_record,
            owner,
            &mut report.revisit,
        )?;
        report.entry_mut(fmri).dependents.extend(outcomes);
        Ok(held_general)
    }

    fn import_instance(
        &self,
        service: &ServiceState,
        decl: &InstanceDecl,
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let fmri = match service.entity.fmri.child(&decl.name) {
            Ok(f) => f,
            Err(e) => {
                let err = ExError::from(e)
                    .with_entity(format!("{}:{}", service.entity.fmri, decl.name));
                warn!("rejected instance: {}", err);
                report.rejected.push(err);
                return Ok(());
            }
        };
        match self.instance_pass(service, &fmri, decl, owner, report) {
            Ok(()) => Ok(()),
            Err(e) => absorb_failure(report, &fmri, e),
        }
    }

    fn instance_pass(
        &self,
        service: &ServiceState,
        fmri: &Fmri,
        decl: &InstanceDecl,
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let (entity, created) = self.lookup_or_reset(fmri)?;
        let is_new = created || service.created || service.fresh_instances.contains(fmri);
        if created {
            report.entry_mut(fmri).created = true;
        }

        let held = self.import_groups(
            &entity,
            &decl.property_groups,
            &decl.dependents,
            owner,
            report,
        )?;
        let snapshots = self.snapshots();
        if let Some(general) = held {
            snapshots.take(&entity, SNAPSHOT_RUNNING)?;
            self.writer()
                .write(&entity, &general, owner, WriteMode::Merge, &[])?;
            debug!(fmri = %fmri, "delayed enable written");
        }
        // "initial" marks the first import that went through cleanly, which
        // may come after a stub creation or a failed attempt
        let clean = report.entry_mut(fmri).failures.is_empty();
        if clean
            && self
                .client
                .get_snapshot(&entity, SNAPSHOT_INITIAL)?
                .is_none()
        {
            snapshots.take(&entity, SNAPSHOT_INITIAL)?;
        }
        report.entry_mut(fmri).advance(Progress::Imported);

        if self.options.refresh.applies_to(is_new) {
            snapshots.take(&entity, SNAPSHOT_RUNNING)?;
            self.request_refresh(&entity);
            report.entry_mut(fmri).advance(Progress::RefreshRequested);
        }
        info!(fmri = %fmri, new = is_new, "instance imported");
        Ok(())
    }

    /// Existing instances the bundle does not list still see service changes
    fn refresh_unlisted(&self, service: &ServiceState, decl: &ServiceDecl) -> Result<()> {
        if !self.options.refresh.applies_to(false) {
            return Ok(());
        }
        let snapshots = self.snapshots();
        for instance in &service.existing_instances {
            let listed = decl
                .instances
                .iter()
                .any(|i| instance.fmri.instance_name() == Some(i.name.as_str()));
            if listed {
                continue;
            }
            match snapshots.take(instance, SNAPSHOT_RUNNING) {
                Ok(_) => self.request_refresh(instance),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(fmri = %instance.fmri, "running snapshot failed: {}", e),
            }
        }
        Ok(())
    }

    fn request_refresh(&self, entity: &EntityRef) {
        if let Err(e) = self.client.refresh(entity) {
            warn!(fmri = %entity.fmri, "refresh failed: {}", e);
        }
    }
}
