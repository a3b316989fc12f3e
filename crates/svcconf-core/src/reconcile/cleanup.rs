//! Removing configuration no longer claimed by the bundle that supplied it
//!
//! Everything here is conservative: a group is deleted only when the
//! processing decoration is provably its sole owner, and a property is
//! retracted only at that decoration's layer.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::client::{EntityRef, PgRef, RepositoryClient, TxEntry};
use crate::errors::{RepoError, Result};
use crate::model::wellknown::{PG_TYPE_DEPENDENCY, PROP_EXTERNAL};
use crate::model::{Decoration, Fmri, Layer, PgContents, Value};
use crate::retry::{with_retry, RetryPolicy};

/// Planned handling of one persistent group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction {
    Keep,
    Delete,
    /// Retract the listed properties at the owner's layer, then optionally
    /// drop the owner's group decoration
    Retract {
        properties: Vec<String>,
        undecorate: bool,
    },
}

/// A dependency group another bundle created to express a reverse dependency
pub fn is_external_dependency(pg: &PgContents) -> bool {
    pg.pg_type == PG_TYPE_DEPENDENCY && pg.first_value(PROP_EXTERNAL) == Some(&Value::Boolean(true))
}

/// Decide what to do with a group the bundle no longer declares
pub fn plan_stale_group(pg: &PgContents, owner: &Decoration) -> GroupAction {
    if !pg.is_persistent() || is_external_dependency(pg) {
        return GroupAction::Keep;
    }
    if pg.is_owned_solely_by(owner) {
        return GroupAction::Delete;
    }
    let properties: Vec<String> = pg
        .properties
        .values()
        .filter(|p| p.is_owned_solely_by(owner))
        .map(|p| p.name.clone())
        .collect();
    let remaining = pg
        .properties
        .values()
        .any(|p| p.is_contributed_by(owner) && !properties.contains(&p.name));
    let undecorate = pg.is_decorated_by(owner) && !remaining;
    if properties.is_empty() && !undecorate {
        GroupAction::Keep
    } else {
        GroupAction::Retract {
            properties,
            undecorate,
        }
    }
}

/// Decide what to do with a group when the bundle behind `owner` is removed
pub fn plan_removed_source(pg: &PgContents, owner: &Decoration) -> GroupAction {
    if !pg.is_persistent() {
        return GroupAction::Keep;
    }
    if pg.is_owned_solely_by(owner) {
        return GroupAction::Delete;
    }
    let properties: Vec<String> = pg
        .properties
        .values()
        .filter(|p| p.is_contributed_by(owner))
        .map(|p| p.name.clone())
        .collect();
    let undecorate = pg.is_decorated_by(owner);
    if properties.is_empty() && !undecorate {
        GroupAction::Keep
    } else {
        GroupAction::Retract {
            properties,
            undecorate,
        }
    }
}

/// Counts of what a cleanup pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub deleted_groups: Vec<String>,
    pub retracted_properties: usize,
    pub undecorated_groups: usize,
    pub deleted_entities: Vec<Fmri>,
}

impl CleanupOutcome {
    fn absorb(&mut self, other: CleanupOutcome) {
        self.deleted_groups.extend(other.deleted_groups);
        self.retracted_properties += other.retracted_properties;
        self.undecorated_groups += other.undecorated_groups;
        self.deleted_entities.extend(other.deleted_entities);
    }

    pub fn is_empty(&self) -> bool {
        *self == CleanupOutcome::default()
    }
}

pub struct CleanupScanner<'a> {
    client: &'a dyn RepositoryClient,
    retry: RetryPolicy,
}

impl<'a> CleanupScanner<'a> {
    pub fn new(client: &'a dyn RepositoryClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Reconcile groups on `entity` that the bundle behind `owner` no longer
    /// declares
    ///
    /// # Errors
    ///
    /// Any repository failure except a group deleted underneath the scan,
    /// which is skipped.
    pub fn process_old_groups(
        &self,
        entity: &EntityRef,
        declared: &BTreeSet<String>,
        owner: &Decoration,
    ) -> Result<CleanupOutcome> {
        let mut outcome = CleanupOutcome::default();
        for pg in self.client.list_property_groups(entity)? {
            if declared.contains(&pg.name) {
                continue;
            }
            self.apply_plan(&pg, owner, plan_stale_group, &mut outcome)?;
        }
        Ok(outcome)
    }

    fn apply_plan(
        &self,
        pg: &PgRef,
        owner: &Decoration,
        plan: fn(&PgContents, &Decoration) -> GroupAction,
        outcome: &mut CleanupOutcome,
    ) -> Result<()> {
        let contents = match self.client.read_property_group(pg) {
            Ok(c) => c,
            Err(RepoError::Deleted { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match plan(&contents, owner) {
            GroupAction::Keep => {}
            GroupAction::Delete => {
                match self.client.delete_property_group(pg) {
                    Ok(()) | Err(RepoError::Deleted { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
                debug!(
                    fmri = %pg.entity.fmri,
                    pg = %pg.name,
                    source = %owner,
                    "deleted stale property group"
                );
                outcome
                    .deleted_groups
                    .push(format!("{}/{}", pg.entity.fmri, pg.name));
            }
            GroupAction::Retract { .. } => {
                let mut retracted = 0;
                let mut undecorated = false;
                let result = with_retry(self.client, &self.retry, pg, owner, |tx| {
                    // Re-plan against the contents this attempt actually sees
                    retracted = 0;
                    undecorated = false;
                    let properties = match plan(tx.base(), owner) {
                        GroupAction::Keep => return Ok(()),
                        GroupAction::Delete => {
                            undecorated = true;
                            tx.base().properties.keys().cloned().collect()
                        }
                        GroupAction::Retract {
                            properties,
                            undecorate,
                        } => {
                            undecorated = undecorate;
                            properties
                        }
                    };
                    for name in &properties {
                        tx.retract(name);
                    }
                    retracted = properties.len();
                    if undecorated {
                        tx.push(TxEntry::Undecorate);
                    }
                    Ok(())
                });
                match result {
                    Ok(_) => {}
                    Err(e) if e.kind() == crate::errors::ExErrorKind::Deleted => return Ok(()),
                    Err(e) => return Err(e.or_entity(pg.entity.fmri.to_string()).or_pg(&pg.name)),
                }
                debug!(
                    fmri = %pg.entity.fmri,
                    pg = %pg.name,
                    retracted,
                    undecorated,
                    "retracted stale contributions"
                );
                outcome.retracted_properties += retracted;
                outcome.undecorated_groups += usize::from(undecorated);
            }
        }
        Ok(())
    }

    /// Bundle sources that decorate anything in the repository at `layer`
    ///
    /// # Errors
    ///
    /// Any repository failure other than a concurrently deleted entity or group.
    pub fn known_sources(&self, layer: Layer) -> Result<BTreeSet<String>> {
        let mut sources = BTreeSet::new();
        for entity in self.all_entities()? {
            for pg in self.client.list_property_groups(&entity)? {
                let contents = match self.client.read_property_group(&pg) {
                    Ok(c) => c,
                    Err(RepoError::Deleted { .. }) => continue,
                    Err(e) => return Err(e.into()),
                };
                let from_groups = contents
                    .decorations
                    .iter()
                    .filter(|d| d.layer == layer)
                    .filter_map(|d| d.source.clone());
                let from_properties = contents
                    .properties
                    .values()
                    .filter_map(|p| p.contribution(layer))
                    .filter_map(|c| c.source.clone());
                sources.extend(from_groups.chain(from_properties));
            }
        }
        Ok(sources)
    }

    /// Services and their instances, instances after their service
    fn all_entities(&self) -> Result<Vec<EntityRef>> {
        let mut entities = Vec::new();
        for service in self.client.list_services()? {
            let instances = match self.client.list_instances(&service) {
                Ok(i) => i,
                Err(RepoError::Deleted { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            entities.push(service);
            entities.extend(instances);
        }
        Ok(entities)
    }

    /// Strip everything the bundle behind `owner` supplied
    ///
    /// Entities emptied by the removal are deleted.
    ///
    /// # Errors
    ///
    /// The first repository failure; whatever was removed before it stays
    /// removed.
    pub fn remove_source(&self, owner: &Decoration) -> Result<CleanupOutcome> {
        let mut outcome = CleanupOutcome::default();
        for service in self.client.list_services()? {
            let instances = match self.client.list_instances(&service) {
                Ok(i) => i,
                Err(RepoError::Deleted { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            let mut service_touched = false;
            for instance in &instances {
                let touched = self.strip_entity(instance, owner, &mut outcome)?;
                service_touched |= touched;
                if touched && !self.has_persistent_groups(instance)? {
                    self.delete_emptied(instance, &mut outcome)?;
                }
            }
            service_touched |= self.strip_entity(&service, owner, &mut outcome)?;
            if !service_touched {
                continue;
            }
            let childless = match self.client.list_instances(&service) {
                Ok(i) => i.is_empty(),
                Err(RepoError::Deleted { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if childless && !self.has_persistent_groups(&service)? {
                self.delete_emptied(&service, &mut outcome)?;
            }
        }
        info!(
            source = %owner,
            deleted_groups = outcome.deleted_groups.len(),
            retracted = outcome.retracted_properties,
            deleted_entities = outcome.deleted_entities.len(),
            "bundle source removed"
        );
        Ok(outcome)
    }

    /// Remove every source known at `layer` that is not in `live`
    ///
    /// # Errors
    ///
    /// As `remove_source`, for the source being removed when it failed.
    pub fn cleanup_bundles(
        &self,
        live: &BTreeSet<String>,
        layer: Layer,
    ) -> Result<Vec<(String, CleanupOutcome)>> {
        let mut removed = Vec::new();
        for source in self.known_sources(layer)? {
            if live.contains(&source) {
                continue;
            }
            let outcome = self.remove_source(&Decoration::new(layer, source.clone()))?;
            removed.push((source, outcome));
        }
        Ok(removed)
    }

    fn strip_entity(
        &self,
        entity: &EntityRef,
        owner: &Decoration,
        outcome: &mut CleanupOutcome,
    ) -> Result<bool> {
        let pgs = match self.client.list_property_groups(entity) {
            Ok(p) => p,
            Err(RepoError::Deleted { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut local = CleanupOutcome::default();
        for pg in &pgs {
            self.apply_plan(pg, owner, plan_removed_source, &mut local)?;
        }
        let touched = !local.is_empty();
        outcome.absorb(local);
        Ok(touched)
    }

    fn has_persistent_groups(&self, entity: &EntityRef) -> Result<bool> {
        let pgs = match self.client.list_property_groups(entity) {
            Ok(p) => p,
            Err(RepoError::Deleted { .. }) => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        for pg in pgs {
            match self.client.read_property_group(&pg) {
                Ok(c) if c.is_persistent() => return Ok(true),
                Ok(_) | Err(RepoError::Deleted { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    fn delete_emptied(&self, entity: &EntityRef, outcome: &mut CleanupOutcome) -> Result<()> {
        match self.client.delete_entity(entity) {
            Ok(()) => {
                info!(fmri = %entity.fmri, "deleted entity left empty by bundle removal");
                outcome.deleted_entities.push(entity.fmri.clone());
                Ok(())
            }
            Err(RepoError::Deleted { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
