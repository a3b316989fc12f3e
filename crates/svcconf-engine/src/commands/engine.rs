//! Engine façade
//!
//! Each top-level operation runs against the session's client under a fresh
//! `RequestContext`, bracketed by:
//! - `log_op_start!` at entry
//! - `log_op_end!` on success
//! - `log_op_error!` on failure
//!
//! Import and apply always return a report; a fatal error lands in
//! `report.fatal` next to the per-entity progress made before it. An
//! `Unreachable` failure drops the session's client so the next call
//! reconnects.

use std::collections::BTreeSet;
use std::fs;
use std::time::Instant;

use svcconf_core::client::{Connector, EntityRef, RepositoryClient};
use svcconf_core::errors::{ExError, ExErrorKind, Result};
use svcconf_core::model::{Fmri, Layer, PgContents, SnapshotRef};
use svcconf_core::reconcile::cleanup::CleanupOutcome;
use svcconf_core::reconcile::snapshot::RestoreOutcome;
use svcconf_core::{
    log_op_end, log_op_error, log_op_start, Applier, Bundle, CleanupScanner, Importer, NoSchema,
    ReconcileReport, SchemaValidator, SnapshotManager,
};
use svcconf_core_types::RequestContext;
use svcconf_store::SqliteConnector;

use crate::config::EngineConfig;
use crate::session::Session;

const OP_IMPORT: &str = "import_bundle";
const OP_APPLY: &str = "apply_profile";
const OP_CLEANUP: &str = "cleanup_bundles";
const OP_TAKE: &str = "take_snapshot";
const OP_RESTORE: &str = "restore_snapshot";

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn missing_entity(fmri: &Fmri) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_entity(fmri.to_string())
        .with_message("no such entity")
}

/// Resolve `fmri` to a live instance
fn lookup_instance(client: &dyn RepositoryClient, fmri: &Fmri) -> Result<EntityRef> {
    if !fmri.is_instance() {
        return Err(ExError::new(ExErrorKind::InvalidInput)
            .with_entity(fmri.to_string())
            .with_message("snapshots belong to instances"));
    }
    client.get_entity(fmri)?.ok_or_else(|| missing_entity(fmri))
}

pub struct Engine<K: Connector> {
    session: Session<K>,
    config: EngineConfig,
    validator: Box<dyn SchemaValidator>,
}

impl Engine<SqliteConnector> {
    /// Engine on the SQLite repository named by `config`
    ///
    /// # Errors
    ///
    /// `Io` when the repository's directory cannot be created.
    pub fn sqlite(config: EngineConfig) -> Result<Self> {
        let path = config.repository.path.clone();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                ExError::new(ExErrorKind::Io)
                    .with_op("open_repository")
                    .with_message(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(Self::new(SqliteConnector::new(path), config))
    }
}

impl<K: Connector> Engine<K> {
    pub fn new(connector: K, config: EngineConfig) -> Self {
        Self {
            session: Session::new(connector),
            config,
            validator: Box::new(NoSchema),
        }
    }

    /// Use `validator` for profile type inference
    pub fn with_validator(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&mut self) -> &mut Session<K> {
        &mut self.session
    }

    /// Import a bundle at the manifest layer
    pub fn import_bundle(&mut self, bundle: &Bundle) -> ReconcileReport {
        let ctx = RequestContext::new().with_label(bundle.source.clone());
        log_op_start!(
            OP_IMPORT,
            request_id = ctx.request_id.as_str(),
            source = bundle.source.as_str()
        );
        let start = Instant::now();

        let mut report = ReconcileReport::new();
        report.request_id = Some(ctx.request_id.clone());
        let options = self.config.import_options();
        let result = self
            .session
            .client()
            .and_then(|client| Importer::new(client, options).import(bundle, &mut report));
        self.finish_report(OP_IMPORT, &ctx, start, result, report)
    }

    /// Apply a profile at `layer`
    pub fn apply_profile(&mut self, profile: &Bundle, layer: Layer) -> ReconcileReport {
        let ctx = RequestContext::new().with_label(profile.source.clone());
        log_op_start!(
            OP_APPLY,
            request_id = ctx.request_id.as_str(),
            source = profile.source.as_str(),
            layer = layer.as_str()
        );
        let start = Instant::now();

        let mut report = ReconcileReport::new();
        report.request_id = Some(ctx.request_id.clone());
        let retry = self.config.retry_policy();
        let validator = self.validator.as_ref();
        let result = self.session.client().and_then(|client| {
            Applier::new(client, validator, layer, retry).apply(profile, &mut report)
        });
        self.finish_report(OP_APPLY, &ctx, start, result, report)
    }

    /// Remove what every bundle source at `layer` outside `live` contributed
    ///
    /// # Errors
    ///
    /// The first fatal error; sources removed before it stay removed.
    pub fn cleanup_bundles(
        &mut self,
        live: &BTreeSet<String>,
        layer: Layer,
    ) -> Result<Vec<(String, CleanupOutcome)>> {
        let ctx = RequestContext::new();
        log_op_start!(
            OP_CLEANUP,
            request_id = ctx.request_id.as_str(),
            layer = layer.as_str(),
            live_sources = live.len()
        );
        let start = Instant::now();

        let retry = self.config.retry_policy();
        let result = self
            .session
            .client()
            .and_then(|client| CleanupScanner::new(client, retry).cleanup_bundles(live, layer));
        let removed = self.finish(OP_CLEANUP, &ctx, start, result)?;
        log_op_end!(
            OP_CLEANUP,
            duration_ms = elapsed_ms(start),
            request_id = ctx.request_id.as_str(),
            removed_sources = removed.len()
        );
        Ok(removed)
    }

    /// Take (or replace) the named snapshot of an instance
    ///
    /// Returns `None` when the instance vanished while the snapshot was
    /// being taken.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing instance, or the repository's failure.
    pub fn take_snapshot(&mut self, instance: &Fmri, name: &str) -> Result<Option<SnapshotRef>> {
        let ctx = RequestContext::new();
        log_op_start!(
            OP_TAKE,
            request_id = ctx.request_id.as_str(),
            fmri = %instance,
            snapshot = name
        );
        let start = Instant::now();

        let retry = self.config.retry_policy();
        let result = self.session.client().and_then(|client| {
            let entity = lookup_instance(client, instance)?;
            SnapshotManager::new(client, retry).take(&entity, name)
        });
        let taken = self.finish(OP_TAKE, &ctx, start, result)?;
        log_op_end!(
            OP_TAKE,
            duration_ms = elapsed_ms(start),
            request_id = ctx.request_id.as_str(),
            taken = taken.is_some()
        );
        Ok(taken)
    }

    /// Revert an instance to one of its snapshots
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing instance or snapshot, or the first error
    /// that stopped the revert.
    pub fn restore_snapshot(&mut self, instance: &Fmri, name: &str) -> Result<RestoreOutcome> {
        let ctx = RequestContext::new();
        log_op_start!(
            OP_RESTORE,
            request_id = ctx.request_id.as_str(),
            fmri = %instance,
            snapshot = name
        );
        let start = Instant::now();

        let retry = self.config.retry_policy();
        let enabled = self.config.revert.enabled;
        let result = self.session.client().and_then(|client| {
            let entity = lookup_instance(client, instance)?;
            SnapshotManager::new(client, retry).restore(&entity, name, enabled)
        });
        let outcome = self.finish(OP_RESTORE, &ctx, start, result)?;
        log_op_end!(
            OP_RESTORE,
            duration_ms = elapsed_ms(start),
            request_id = ctx.request_id.as_str(),
            groups_restored = outcome.groups_restored,
            enabled_preserved = outcome.enabled_preserved
        );
        Ok(outcome)
    }

    /// # Errors
    ///
    /// `NotFound` for a missing instance, or the repository's failure.
    pub fn list_snapshots(&mut self, instance: &Fmri) -> Result<Vec<SnapshotRef>> {
        let retry = self.config.retry_policy();
        let result = self.session.client().and_then(|client| {
            let entity = lookup_instance(client, instance)?;
            SnapshotManager::new(client, retry).list(&entity)
        });
        self.settle(result)
    }

    /// Current property groups of an entity
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing entity, or the repository's failure.
    pub fn show(&mut self, fmri: &Fmri) -> Result<Vec<PgContents>> {
        let result = self.session.client().and_then(|client| {
            let entity = client
                .get_entity(fmri)?
                .ok_or_else(|| missing_entity(fmri))?;
            let mut groups = Vec::new();
            for pg in client.list_property_groups(&entity)? {
                groups.push(client.read_property_group(&pg)?);
            }
            Ok(groups)
        });
        self.settle(result.map_err(|e: ExError| e.or_op("show")))
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.kind() == ExErrorKind::Unreachable {
                self.session.disconnect();
            }
        }
        result
    }

    fn finish<T>(
        &mut self,
        op: &str,
        ctx: &RequestContext,
        start: Instant,
        result: Result<T>,
    ) -> Result<T> {
        self.settle(result).map_err(|e| {
            let e = e.or_op(op).with_request_id(ctx.request_id.clone());
            log_op_error!(
                op,
                e,
                duration_ms = elapsed_ms(start),
                request_id = ctx.request_id.as_str()
            );
            e
        })
    }

    fn finish_report(
        &mut self,
        op: &str,
        ctx: &RequestContext,
        start: Instant,
        result: Result<()>,
        mut report: ReconcileReport,
    ) -> ReconcileReport {
        match self.finish(op, ctx, start, result) {
            Ok(()) => {
                log_op_end!(
                    op,
                    duration_ms = elapsed_ms(start),
                    request_id = ctx.request_id.as_str(),
                    status = report.status().code(),
                    entities = report.entries.len()
                );
            }
            Err(e) => report.fatal = Some(e),
        }
        report
    }
}
