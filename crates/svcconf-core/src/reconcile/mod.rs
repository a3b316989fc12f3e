//! Reconciliation engine: import, apply, snapshot, dependents, cleanup

pub mod applier;
pub mod cleanup;
pub mod dependency;
pub mod importer;
pub mod pg_write;
pub mod report;
pub mod snapshot;

pub use applier::Applier;
pub use cleanup::{CleanupOutcome, CleanupScanner, GroupAction};
pub use dependency::DependencyResolver;
pub use importer::Importer;
pub use pg_write::{PgWriter, ResolvedPg, ResolvedProperty, WriteMode};
pub use report::{
    DependentOutcome, DependentResult, EntityReport, Progress, ReconcileReport, ReportStatus,
};
pub use snapshot::{RestoreOutcome, SnapshotManager};

use tracing::warn;

use crate::errors::{Disposition, ExError, Result};
use crate::model::Fmri;

/// Record a per-entity failure, or hand back a fatal one
pub(crate) fn absorb_failure(
    report: &mut ReconcileReport,
    fmri: &Fmri,
    err: ExError,
) -> Result<()> {
    let err = err.or_entity(fmri.to_string());
    let entry = report.entry_mut(fmri);
    match err.disposition() {
        Disposition::Fatal => return Err(err),
        Disposition::Busy => {
            warn!(fmri = %fmri, err_code = err.code(), "entity busy, skipped: {}", err);
            entry.busy = true;
        }
        Disposition::SkipEntity | Disposition::Structural | Disposition::Adopt => {
            warn!(fmri = %fmri, err_code = err.code(), "entity skipped: {}", err);
        }
    }
    entry.failures.push(err);
    Ok(())
}
