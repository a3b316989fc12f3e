//! Materializing dependent declarations inside their target entities
//!
//! A dependent declared on entity `S` with target `T` becomes a `dependency`
//! group inside `T` whose `entities` property points back at `S`. The
//! declaring entity keeps a `dependents` record of name → target so that a
//! later import can retire dependents that were dropped or retargeted.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::bundle::DependentDecl;
use crate::client::{EntityRef, RepositoryClient, TxEntry};
use crate::errors::{ExError, ExErrorKind, RepoError, Result};
use crate::model::wellknown::{
    DEFAULT_GROUPING, DEFAULT_RESTART_ON, DEPENDENCY_TYPE_SERVICE, PG_DEPENDENTS,
    PG_TYPE_DEPENDENCY, PG_TYPE_FRAMEWORK, PROP_ENTITIES, PROP_EXTERNAL, PROP_GROUPING,
    PROP_RESTART_ON, PROP_TYPE,
};
use crate::model::{Decoration, Fmri, PgFlags, Value, ValueType};
use crate::reconcile::cleanup::{plan_removed_source, GroupAction};
use crate::reconcile::pg_write::{PgWriter, ResolvedPg, ResolvedProperty, WriteMode};
use crate::reconcile::report::{DependentOutcome, DependentResult};
use crate::retry::{with_retry, RetryPolicy};

/// Previously recorded dependents of an entity: name → target
pub type DependentRecord = BTreeMap<String, Fmri>;

pub struct DependencyResolver<'a> {
    client: &'a dyn RepositoryClient,
    retry: RetryPolicy,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(client: &'a dyn RepositoryClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Read the `dependents` record of a declaring entity
    ///
    /// # Errors
    ///
    /// The repository's failure reading the group.
    pub fn read_record(&self, declaring: &EntityRef) -> Result<DependentRecord> {
        let Some(pg) = self.client.get_property_group(declaring, PG_DEPENDENTS)? else {
            return Ok(DependentRecord::new());
        };
        let contents = match self.client.read_property_group(&pg) {
            Ok(c) => c,
            Err(RepoError::Deleted { .. }) => return Ok(DependentRecord::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .properties
            .values()
            .filter_map(|p| {
                p.effective_values()
                    .first()
                    .and_then(Value::as_fmri)
                    .map(|f| (p.name.clone(), f.clone()))
            })
            .collect())
    }

    /// The `dependents` record group for a set of declarations
    ///
    /// Declarations with an unparseable target are left out; materializing
    /// them reports the failure.
    pub fn record_group(decls: &[DependentDecl]) -> Option<ResolvedPg> {
        if decls.is_empty() {
            return None;
        }
        let pg = decls
            .iter()
            .filter_map(|d| Fmri::parse(&d.target).ok().map(|t| (d, t)))
            .fold(
                ResolvedPg::new(PG_DEPENDENTS, PG_TYPE_FRAMEWORK, PgFlags::PERSISTENT),
                |pg, (d, target)| {
                    pg.with_property(ResolvedProperty::new(
                        &d.name,
                        ValueType::Fmri,
                        vec![Value::Fmri(target)],
                    ))
                },
            );
        Some(pg)
    }

    /// Materialize every declaration and retire stale ones
    ///
    /// Only fatal errors are returned; everything else is recorded in the
    /// outcome of the dependent concerned. Entities whose back-reference got
    /// overwritten are added to `revisit`.
    ///
    /// # Errors
    ///
    /// As `materialize`, the first fatal error.
    pub fn resolve_all(
        &self,
        declaring: &Fmri,
        decls: &[DependentDecl],
        previous: &DependentRecord,
        owner: &Decoration,
        revisit: &mut Vec<Fmri>,
    ) -> Result<Vec<DependentOutcome>> {
        let mut outcomes = Vec::new();
        for decl in decls {
            let outcome = self.materialize(declaring, decl, owner)?;
            if let DependentResult::Overwrote { previous } = &outcome.result {
                if !revisit.contains(previous) {
                    revisit.push(previous.clone());
                }
            }
            outcomes.push(outcome);
        }

        for (name, old_target) in previous {
            let still_declared = decls.iter().any(|d| {
                &d.name == name && Fmri::parse(&d.target).ok().as_ref() == Some(old_target)
            });
            if still_declared {
                continue;
            }
            let result = match self.retire(name, old_target, owner) {
                Ok(()) => DependentResult::Retired,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => DependentResult::Failed(e),
            };
            outcomes.push(DependentOutcome {
                name: name.clone(),
                target: old_target.to_string(),
                result,
            });
        }
        Ok(outcomes)
    }

    /// Write one dependent into its target, creating a stub target if needed
    ///
    /// # Errors
    ///
    /// Only a fatal error; anything else is reported as
    /// `DependentResult::Failed`.
    pub fn materialize(
        &self,
        declaring: &Fmri,
        decl: &DependentDecl,
        owner: &Decoration,
    ) -> Result<DependentOutcome> {
        let outcome = |result| DependentOutcome {
            name: decl.name.clone(),
            target: decl.target.clone(),
            result,
        };
        match self.materialize_inner(declaring, decl, owner) {
            Ok(result) => Ok(outcome(result)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    fmri = %declaring,
                    dependent = %decl.name,
                    target = %decl.target,
                    err_code = e.code(),
                    "dependent not materialized: {}", e
                );
                Ok(outcome(DependentResult::Failed(e)))
            }
        }
    }

    fn materialize_inner(
        &self,
        declaring: &Fmri,
        decl: &DependentDecl,
        owner: &Decoration,
    ) -> Result<DependentResult> {
        let target_fmri = Fmri::parse(&decl.target)
            .map_err(|e| ExError::from(e).with_entity(&decl.target))?;
        let pg = Self::dependency_group(declaring, decl)?;
        let target = self.ensure_entity(&target_fmri)?;

        let mut result = DependentResult::Materialized;
        if let Some(existing) = self.client.get_property_group(&target, &decl.name)? {
            let contents = match self.client.read_property_group(&existing) {
                Ok(c) => Some(c),
                Err(RepoError::Deleted { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            let pointed = contents
                .as_ref()
                .and_then(|c| c.first_value(PROP_ENTITIES))
                .and_then(Value::as_fmri);
            if let Some(previous) = pointed.filter(|p| *p != declaring) {
                warn!(
                    target = %target_fmri,
                    dependent = %decl.name,
                    previous = %previous,
                    now = %declaring,
                    "dependent group pointed at another entity; overwriting"
                );
                result = DependentResult::Overwrote {
                    previous: previous.clone(),
                };
            }
        }

        PgWriter::new(self.client, self.retry)
            .write(&target, &pg, owner, WriteMode::Forced, &[])
            .map_err(|e| e.or_entity(target_fmri.to_string()))?;

        if let Err(e) = self.client.refresh(&target) {
            warn!(fmri = %target_fmri, "refresh after dependent update failed: {}", e);
        }
        debug!(
            fmri = %declaring,
            target = %target_fmri,
            dependent = %decl.name,
            "dependent materialized"
        );
        Ok(result)
    }

    fn dependency_group(declaring: &Fmri, decl: &DependentDecl) -> Result<ResolvedPg> {
        let astring = |name: &str, text: &str| {
            ResolvedProperty::new(
                name,
                ValueType::Astring,
                vec![Value::Astring(text.to_string())],
            )
        };
        let mut pg = ResolvedPg::new(&decl.name, PG_TYPE_DEPENDENCY, PgFlags::PERSISTENT)
            .with_property(ResolvedProperty::new(
                PROP_ENTITIES,
                ValueType::Fmri,
                vec![Value::Fmri(declaring.clone())],
            ))
            .with_property(astring(
                PROP_GROUPING,
                decl.grouping.as_deref().unwrap_or(DEFAULT_GROUPING),
            ))
            .with_property(astring(
                PROP_RESTART_ON,
                decl.restart_on.as_deref().unwrap_or(DEFAULT_RESTART_ON),
            ))
            .with_property(astring(PROP_TYPE, DEPENDENCY_TYPE_SERVICE))
            .with_property(ResolvedProperty::new(
                PROP_EXTERNAL,
                ValueType::Boolean,
                vec![Value::Boolean(true)],
            ));
        for extra in &decl.properties {
            let ty = extra.value_type.ok_or_else(|| {
                ExError::new(ExErrorKind::TypeRequired)
                    .with_pg(&decl.name)
                    .with_property(&extra.name)
            })?;
            let prop = ResolvedProperty::parse(extra, ty).map_err(|e| e.or_pg(&decl.name))?;
            match pg.properties.iter_mut().find(|p| p.name == prop.name) {
                Some(slot) => *slot = prop,
                None => pg.properties.push(prop),
            }
        }
        Ok(pg)
    }

    /// Look up an entity, creating a stub (and its service) if absent
    fn ensure_entity(&self, fmri: &Fmri) -> Result<EntityRef> {
        if let Some(service) = fmri.parent() {
            self.adopt(&service)?;
        }
        self.adopt(fmri)
    }

    fn adopt(&self, fmri: &Fmri) -> Result<EntityRef> {
        let (entity, created) = self
            .client
            .get_or_create(fmri)
            .map_err(|e| ExError::from(e).with_entity(fmri.to_string()))?;
        if created {
            debug!(fmri = %fmri, "created stub entity for dependent");
        }
        Ok(entity)
    }

    /// Remove this bundle's contribution to a dependent on its old target
    fn retire(&self, name: &str, target: &Fmri, owner: &Decoration) -> Result<()> {
        let Some(entity) = self.client.get_entity(target)? else {
            return Ok(());
        };
        let Some(pg) = self.client.get_property_group(&entity, name)? else {
            return Ok(());
        };
        let contents = match self.client.read_property_group(&pg) {
            Ok(c) => c,
            Err(RepoError::Deleted { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match plan_removed_source(&contents, owner) {
            GroupAction::Keep => {}
            GroupAction::Delete => match self.client.delete_property_group(&pg) {
                Ok(()) | Err(RepoError::Deleted { .. }) => {}
                Err(e) => return Err(e.into()),
            },
            GroupAction::Retract { .. } => {
                with_retry(self.client, &self.retry, &pg, owner, |tx| {
                    let names: Vec<String> = tx
                        .base()
                        .properties
                        .values()
                        .filter(|p| p.is_contributed_by(owner))
                        .map(|p| p.name.clone())
                        .collect();
                    for property in &names {
                        tx.retract(property);
                    }
                    tx.push(TxEntry::Undecorate);
                    Ok(())
                })?;
            }
        }
        if let Err(e) = self.client.refresh(&entity) {
            warn!(fmri = %target, "refresh after retiring dependent failed: {}", e);
        }
        debug!(target = %target, dependent = name, "dependent retired");
        Ok(())
    }
}
