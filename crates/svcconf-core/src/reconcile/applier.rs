//! Profile application: layering site or system customizations
//!
//! Unlike import, a profile never takes snapshots, never retracts properties
//! it does not list, and may leave types to be inferred from the live
//! repository, the schema validator, or the parent service.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::absorb_failure;
use crate::bundle::{Bundle, DependentDecl, PgDecl};
use crate::client::{EntityRef, RepositoryClient};
use crate::errors::{ExError, ExErrorKind, RepoError, Result};
use crate::model::wellknown::PG_DEPENDENTS;
use crate::model::{Decoration, Fmri, Layer, PgContents, ValueType};
use crate::reconcile::cleanup::CleanupScanner;
use crate::reconcile::dependency::DependencyResolver;
use crate::reconcile::pg_write::{PgWriter, ResolvedPg, ResolvedProperty, WriteMode};
use crate::reconcile::report::{Progress, ReconcileReport};
use crate::retry::RetryPolicy;
use crate::validator::{PgSchema, SchemaValidator};

/// Where a missing type may be found, in lookup order
#[derive(Default)]
struct TypeSources {
    live: Option<PgContents>,
    schema: Option<PgSchema>,
    parent_live: Option<PgContents>,
    parent_schema: Option<PgSchema>,
}

impl TypeSources {
    fn pg_type(&self) -> Option<String> {
        self.live
            .as_ref()
            .map(|pg| pg.pg_type.clone())
            .or_else(|| self.schema.as_ref().and_then(|s| s.pg_type.clone()))
            .or_else(|| self.parent_live.as_ref().map(|pg| pg.pg_type.clone()))
            .or_else(|| self.parent_schema.as_ref().and_then(|s| s.pg_type.clone()))
    }

    fn value_type(&self, property: &str) -> Option<ValueType> {
        let live = |pg: &Option<PgContents>| {
            pg.as_ref()
                .and_then(|pg| pg.property(property))
                .and_then(|p| p.effective_type())
        };
        let schema = |s: &Option<PgSchema>| {
            s.as_ref()
                .and_then(|s| s.property(property))
                .map(|p| p.value_type)
        };
        live(&self.live)
            .or_else(|| schema(&self.schema))
            .or_else(|| live(&self.parent_live))
            .or_else(|| schema(&self.parent_schema))
    }
}

pub struct Applier<'a> {
    client: &'a dyn RepositoryClient,
    validator: &'a dyn SchemaValidator,
    layer: Layer,
    retry: RetryPolicy,
}

impl<'a> Applier<'a> {
    pub fn new(
        client: &'a dyn RepositoryClient,
        validator: &'a dyn SchemaValidator,
        layer: Layer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            validator,
            layer,
            retry,
        }
    }

    /// Apply `profile` at this applier's layer
    ///
    /// # Errors
    ///
    /// A fatal repository error. Entities that fail locally are recorded in
    /// `report` instead.
    pub fn apply(&self, profile: &Bundle, report: &mut ReconcileReport) -> Result<()> {
        let owner = Decoration::new(self.layer, &profile.source);
        let mut declared: BTreeMap<Fmri, BTreeSet<String>> = BTreeMap::new();

        for service in &profile.services {
            let fmri = match service.fmri() {
                Ok(f) => f,
                Err(e) => {
                    warn!(service = %service.name, "rejected profile service: {}", e);
                    report.rejected.push(e);
                    continue;
                }
            };
            report.entry_mut(&fmri);
            declared.insert(
                fmri.clone(),
                names_of(&service.property_groups, &service.dependents),
            );
            for instance in &service.instances {
                match fmri.child(&instance.name) {
                    Ok(child) => {
                        report.entry_mut(&child);
                        declared.insert(
                            child,
                            names_of(&instance.property_groups, &instance.dependents),
                        );
                    }
                    Err(e) => report.rejected.push(
                        ExError::from(e).with_entity(format!("{}:{}", fmri, instance.name)),
                    ),
                }
            }
        }

        for service in &profile.services {
            let Ok(fmri) = service.fmri() else {
                continue;
            };
            if let Err(e) = self.apply_entity(
                &fmri,
                None,
                &service.property_groups,
                &service.dependents,
                &owner,
                report,
            ) {
                // A failed service skips its instances
                absorb_failure(report, &fmri, e)?;
                continue;
            }
            for instance in &service.instances {
                let Ok(child) = fmri.child(&instance.name) else {
                    continue;
                };
                if let Err(e) = self.apply_entity(
                    &child,
                    Some(&fmri),
                    &instance.property_groups,
                    &instance.dependents,
                    &owner,
                    report,
                ) {
                    absorb_failure(report, &child, e)?;
                }
            }
        }

        self.post_pass(&declared, &owner, report)?;
        self.refresh_touched(report);
        Ok(())
    }

    fn apply_entity(
        &self,
        fmri: &Fmri,
        parent: Option<&Fmri>,
        pgs: &[PgDecl],
        dependents: &[DependentDecl],
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let existing = self.client.get_entity(fmri)?;

        // Settle every type before writing anything
        let mut resolved = pgs
            .iter()
            .map(|decl| self.resolve(fmri, existing.as_ref(), parent, decl))
            .collect::<Result<Vec<_>>>()?;

        let (entity, created) = match existing {
            Some(e) => (e, false),
            None => self.client.get_or_create(fmri)?,
        };
        if created {
            report.entry_mut(fmri).created = true;
        }

        let dependencies = DependencyResolver::new(self.client, self.retry);
        let previous_record = dependencies.read_record(&entity)?;
        if let Some(record) = DependencyResolver::record_group(dependents) {
            resolved.push(record);
        }

        let writer = PgWriter::new(self.client, self.retry);
        for pg in &resolved {
            writer.write(&entity, pg, owner, WriteMode::Merge, &[])?;
            report
                .entry_mut(fmri)
                .advance(Progress::SomePropertiesImported);
        }
        report.entry_mut(fmri).advance(Progress::PropertiesImported);

        let outcomes = dependencies.resolve_all(
            fmri,
            dependents,
            &previous_record,
            owner,
            &mut report.revisit,
        )?;
        let entry = report.entry_mut(fmri);
        entry.dependents.extend(outcomes);
        entry.advance(Progress::Imported);
        debug!(fmri = %fmri, groups = resolved.len(), "profile entity applied");
        Ok(())
    }

    fn resolve(
        &self,
        fmri: &Fmri,
        live: Option<&EntityRef>,
        parent: Option<&Fmri>,
        decl: &PgDecl,
    ) -> Result<ResolvedPg> {
        decl.validate_name()?;
        let needs_inference =
            decl.pg_type.is_none() || decl.properties.iter().any(|p| p.value_type.is_none());
        let sources = if needs_inference {
            self.type_sources(fmri, live, parent, &decl.name)?
        } else {
            TypeSources::default()
        };

        let type_required = |what: &str| {
            ExError::new(ExErrorKind::TypeRequired)
                .with_entity(fmri.to_string())
                .with_pg(&decl.name)
                .with_message(format!("cannot infer the type of {}", what))
        };
        let pg_type = match &decl.pg_type {
            Some(t) => t.clone(),
            None => sources
                .pg_type()
                .ok_or_else(|| type_required("the property group"))?,
        };
        let mut properties = Vec::with_capacity(decl.properties.len());
        for prop in &decl.properties {
            let ty = match prop.value_type {
                Some(t) => t,
                None => sources.value_type(&prop.name).ok_or_else(|| {
                    type_required(&format!("property '{}'", prop.name)).with_property(&prop.name)
                })?,
            };
            let parsed = ResolvedProperty::parse(prop, ty)
                .map_err(|e| e.or_entity(fmri.to_string()).or_pg(&decl.name))?;
            properties.push(parsed);
        }
        Ok(ResolvedPg {
            name: decl.name.clone(),
            pg_type,
            flags: decl.flags,
            properties,
        })
    }

    fn type_sources(
        &self,
        fmri: &Fmri,
        live: Option<&EntityRef>,
        parent: Option<&Fmri>,
        pg: &str,
    ) -> Result<TypeSources> {
        let mut sources = TypeSources {
            live: self.live_group(live, pg)?,
            schema: self.validator.describe(fmri, pg),
            ..TypeSources::default()
        };
        if let Some(parent) = parent {
            let parent_entity = self.client.get_entity(parent)?;
            sources.parent_live = self.live_group(parent_entity.as_ref(), pg)?;
            sources.parent_schema = self.validator.describe(parent, pg);
        }
        Ok(sources)
    }

    fn live_group(&self, entity: Option<&EntityRef>, pg: &str) -> Result<Option<PgContents>> {
        let Some(entity) = entity else {
            return Ok(None);
        };
        let Some(pg_ref) = self.client.get_property_group(entity, pg)? else {
            return Ok(None);
        };
        match self.client.read_property_group(&pg_ref) {
            Ok(c) => Ok(Some(c)),
            Err(RepoError::Deleted { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reconcile this profile's stale contributions across the repository
    fn post_pass(
        &self,
        declared: &BTreeMap<Fmri, BTreeSet<String>>,
        owner: &Decoration,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let cleanup = CleanupScanner::new(self.client, self.retry);
        let empty = BTreeSet::new();
        let mut entities = Vec::new();
        for service in self.client.list_services()? {
            match self.client.list_instances(&service) {
                Ok(instances) => {
                    entities.push(service);
                    entities.extend(instances);
                }
                Err(RepoError::Deleted { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for entity in entities {
            // Entities this pass could not apply keep what they have
            if report.entry(&entity.fmri).is_some_and(|e| !e.is_clean()) {
                continue;
            }
            let names = declared.get(&entity.fmri).unwrap_or(&empty);
            match cleanup.process_old_groups(&entity, names, owner) {
                Ok(outcome) if !outcome.is_empty() => {
                    debug!(
                        fmri = %entity.fmri,
                        deleted = outcome.deleted_groups.len(),
                        "profile post-pass cleaned entity"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if report.entry(&entity.fmri).is_some() => {
                    absorb_failure(report, &entity.fmri, e)?;
                }
                Err(e) => warn!(fmri = %entity.fmri, "profile post-pass failed: {}", e),
            }
        }
        Ok(())
    }

    fn refresh_touched(&self, report: &mut ReconcileReport) {
        for entry in report.entries.iter_mut() {
            if !entry.fmri.is_instance() || entry.progress < Progress::Imported {
                continue;
            }
            let entity = match self.client.get_entity(&entry.fmri) {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    warn!(fmri = %entry.fmri, "refresh lookup failed: {}", e);
                    continue;
                }
            };
            match self.client.refresh(&entity) {
                Ok(()) => entry.advance(Progress::RefreshRequested),
                Err(e) => warn!(fmri = %entry.fmri, "refresh failed: {}", e),
            }
        }
        info!(layer = %self.layer, "profile applied");
    }
}

fn names_of(pgs: &[PgDecl], dependents: &[DependentDecl]) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = pgs.iter().map(|p| p.name.clone()).collect();
    if !dependents.is_empty() {
        names.insert(PG_DEPENDENTS.to_string());
    }
    names
}
