//! Taking, listing and reverting to instance snapshots

use tracing::{debug, info};

use crate::client::{EntityRef, RepositoryClient, TxEntry};
use crate::errors::{ExError, ExErrorKind, RepoError, Result};
use crate::model::wellknown::{PG_GENERAL, PG_TYPE_FRAMEWORK, PROP_ENABLED, SNAPSHOT_PREVIOUS};
use crate::model::{Decoration, PgFlags, PropertyContents, Snaplevel, SnapshotRef};
use crate::policy::EnabledOnRevert;
use crate::reconcile::pg_write::PgWriter;
use crate::retry::{with_retry, RetryPolicy};

/// Result of a revert
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub restored: SnapshotRef,
    /// The "previous" snapshot taken of the live state beforehand
    pub previous: Option<SnapshotRef>,
    pub groups_restored: usize,
    /// Whether the live `enabled` value was put back after the revert
    pub enabled_preserved: bool,
}

pub struct SnapshotManager<'a> {
    client: &'a dyn RepositoryClient,
    retry: RetryPolicy,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(client: &'a dyn RepositoryClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Take or replace the named snapshot
    ///
    /// An instance deleted concurrently has nothing to snapshot: `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Any repository failure other than a deleted instance, tagged with the
    /// `take_snapshot` op.
    pub fn take(&self, instance: &EntityRef, name: &str) -> Result<Option<SnapshotRef>> {
        match self.client.take_snapshot(instance, name) {
            Ok(snapshot) => {
                debug!(fmri = %instance.fmri, snapshot = name, "snapshot taken");
                Ok(Some(snapshot))
            }
            Err(RepoError::Deleted { .. }) => {
                debug!(
                    fmri = %instance.fmri,
                    snapshot = name,
                    "instance gone, nothing to snapshot"
                );
                Ok(None)
            }
            Err(e) => Err(ExError::from(e)
                .with_op("take_snapshot")
                .with_entity(instance.fmri.to_string())),
        }
    }

    /// Snapshots of an instance, oldest first
    ///
    /// # Errors
    ///
    /// The repository's failure listing them.
    pub fn list(&self, instance: &EntityRef) -> Result<Vec<SnapshotRef>> {
        let mut snapshots = self.client.list_snapshots(instance)?;
        snapshots.sort_by(|a, b| {
            a.taken_at
                .cmp(&b.taken_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(snapshots)
    }

    /// Revert an instance and its service to the named snapshot
    ///
    /// Reads the snapshot before anything else, so reverting to "previous"
    /// restores the old "previous" even though a new one is taken first.
    ///
    /// # Errors
    ///
    /// `NotFound` when the instance has no such snapshot, or the first
    /// repository failure, tagged with the `restore_snapshot` op.
    pub fn restore(
        &self,
        instance: &EntityRef,
        name: &str,
        enabled: EnabledOnRevert,
    ) -> Result<RestoreOutcome> {
        let err_ctx = |e: ExError| {
            e.with_op("restore_snapshot")
                .or_entity(instance.fmri.to_string())
        };
        let snapshot = self
            .client
            .get_snapshot(instance, name)?
            .ok_or_else(|| {
                ExError::new(ExErrorKind::NotFound)
                    .with_message(format!("instance has no snapshot named '{}'", name))
            })
            .map_err(err_ctx)?;
        let levels = self
            .client
            .list_snaplevels(&snapshot)
            .map_err(|e| err_ctx(e.into()))?;

        let previous = self.take(instance, SNAPSHOT_PREVIOUS)?;
        let live_enabled = self.live_enabled(instance).map_err(err_ctx)?;

        let mut groups_restored = 0;
        for level in &levels {
            groups_restored += self.restore_level(level).map_err(err_ctx)?;
        }

        let snapshot_has_enabled = levels
            .iter()
            .filter(|l| l.entity == instance.fmri)
            .any(|l| {
                l.property_group(PG_GENERAL)
                    .is_some_and(|pg| pg.property(PROP_ENABLED).is_some())
            });
        let preserve = match enabled {
            EnabledOnRevert::PreserveLive => true,
            EnabledOnRevert::SnapshotIfExplicit => !snapshot_has_enabled,
            EnabledOnRevert::Snapshot => false,
        };
        if preserve {
            self.put_enabled(instance, live_enabled).map_err(err_ctx)?;
        }

        info!(
            fmri = %instance.fmri,
            snapshot = name,
            groups_restored,
            enabled_preserved = preserve,
            "instance reverted"
        );
        Ok(RestoreOutcome {
            restored: snapshot,
            previous,
            groups_restored,
            enabled_preserved: preserve,
        })
    }

    fn live_enabled(&self, instance: &EntityRef) -> Result<Option<PropertyContents>> {
        let Some(pg) = self.client.get_property_group(instance, PG_GENERAL)? else {
            return Ok(None);
        };
        let contents = self.client.read_property_group(&pg)?;
        Ok(contents.property(PROP_ENABLED).cloned())
    }

    /// Put `enabled` back verbatim; `None` removes whatever the revert wrote
    fn put_enabled(&self, instance: &EntityRef, live: Option<PropertyContents>) -> Result<()> {
        let writer = PgWriter::new(self.client, self.retry);
        let pg = match &live {
            Some(_) => {
                writer
                    .ensure_group(instance, PG_GENERAL, PG_TYPE_FRAMEWORK, PgFlags::PERSISTENT)?
                    .0
            }
            None => match self.client.get_property_group(instance, PG_GENERAL)? {
                Some(pg) => pg,
                None => return Ok(()),
            },
        };
        let property = live.unwrap_or_else(|| PropertyContents::new(PROP_ENABLED));
        with_retry(self.client, &self.retry, &pg, &Decoration::admin(), |tx| {
            tx.push(TxEntry::CopyProperty(property.clone()));
            Ok(())
        })?;
        Ok(())
    }

    fn restore_level(&self, level: &Snaplevel) -> Result<usize> {
        let entity = self
            .client
            .get_entity(&level.entity)?
            .ok_or_else(|| RepoError::deleted(level.entity.to_string()))?;

        for pg in self.client.list_property_groups(&entity)? {
            let contents = match self.client.read_property_group(&pg) {
                Ok(c) => c,
                Err(RepoError::Deleted { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if !contents.is_persistent() {
                continue;
            }
            match self.client.delete_property_group(&pg) {
                Ok(()) | Err(RepoError::Deleted { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let writer = PgWriter::new(self.client, self.retry);
        for saved in &level.property_groups {
            let (pg, _) = writer.ensure_group(&entity, &saved.name, &saved.pg_type, saved.flags)?;
            with_retry(self.client, &self.retry, &pg, &Decoration::admin(), |tx| {
                if tx.base().pg_type != saved.pg_type || tx.base().flags != saved.flags {
                    tx.push(TxEntry::ModifyGroup {
                        pg_type: saved.pg_type.clone(),
                        flags: saved.flags,
                    });
                }
                for prop in saved.properties.values() {
                    tx.push(TxEntry::CopyProperty(prop.clone()));
                }
                tx.push(TxEntry::CopyDecorations(saved.decorations.clone()));
                Ok(())
            })
            .map_err(|e| e.or_pg(&saved.name))?;
        }
        Ok(level.property_groups.len())
    }
}
