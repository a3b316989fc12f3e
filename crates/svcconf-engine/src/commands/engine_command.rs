//! Engine commands: one variant per top-level operation

use std::collections::BTreeSet;

use svcconf_core::client::Connector;
use svcconf_core::errors::Result;
use svcconf_core::model::{Fmri, Layer, PgContents, SnapshotRef};
use svcconf_core::reconcile::cleanup::CleanupOutcome;
use svcconf_core::reconcile::snapshot::RestoreOutcome;
use svcconf_core::{Bundle, ReconcileReport};

use super::engine::Engine;

#[derive(Debug, Clone)]
pub enum EngineCommand {
    ImportBundle {
        bundle: Bundle,
    },
    ApplyProfile {
        profile: Bundle,
        layer: Layer,
    },
    /// Remove every source at `layer` that is not in `live`
    CleanupBundles {
        live: BTreeSet<String>,
        layer: Layer,
    },
    TakeSnapshot {
        instance: Fmri,
        name: String,
    },
    RestoreSnapshot {
        instance: Fmri,
        name: String,
    },
    ListSnapshots {
        instance: Fmri,
    },
    Show {
        fmri: Fmri,
    },
}

#[derive(Debug, Clone)]
pub enum EngineCommandResult {
    /// Import or apply; check `report.fatal` and `report.status()`
    Reconciled(ReconcileReport),
    Cleaned(Vec<(String, CleanupOutcome)>),
    /// `None` when the instance vanished mid-snapshot
    SnapshotTaken(Option<SnapshotRef>),
    SnapshotRestored(RestoreOutcome),
    Snapshots(Vec<SnapshotRef>),
    PropertyGroups(Vec<PgContents>),
}

/// Run one engine command
///
/// # Errors
///
/// Whatever the underlying engine operation reports. Import and apply
/// never fail here; their fatal errors are carried in the report.
pub fn apply_engine_command<K: Connector>(
    cmd: EngineCommand,
    engine: &mut Engine<K>,
) -> Result<EngineCommandResult> {
    match cmd {
        EngineCommand::ImportBundle { bundle } => {
            Ok(EngineCommandResult::Reconciled(engine.import_bundle(&bundle)))
        }
        EngineCommand::ApplyProfile { profile, layer } => Ok(EngineCommandResult::Reconciled(
            engine.apply_profile(&profile, layer),
        )),
        EngineCommand::CleanupBundles { live, layer } => engine
            .cleanup_bundles(&live, layer)
            .map(EngineCommandResult::Cleaned),
        EngineCommand::TakeSnapshot { instance, name } => engine
            .take_snapshot(&instance, &name)
            .map(EngineCommandResult::SnapshotTaken),
        EngineCommand::RestoreSnapshot { instance, name } => engine
            .restore_snapshot(&instance, &name)
            .map(EngineCommandResult::SnapshotRestored),
        EngineCommand::ListSnapshots { instance } => engine
            .list_snapshots(&instance)
            .map(EngineCommandResult::Snapshots),
        EngineCommand::Show { fmri } => engine.show(&fmri).map(EngineCommandResult::PropertyGroups),
    }
}
