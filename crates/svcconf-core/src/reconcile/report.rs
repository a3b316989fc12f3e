//! Per-entity progress table returned by every top-level call

use std::fmt;

use svcconf_core_types::RequestId;

use crate::errors::{Disposition, ExError, ExErrorKind};
use crate::model::Fmri;

/// How far reconciliation of one entity got
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Progress {
    NotReached,
    PreviousSnapshotTaken,
    SomePropertiesImported,
    PropertiesImported,
    Imported,
    RefreshRequested,
}

impl Progress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Progress::NotReached => "not-reached",
            Progress::PreviousSnapshotTaken => "previous-snapshot-taken",
            Progress::SomePropertiesImported => "some-properties-imported",
            Progress::PropertiesImported => "properties-imported",
            Progress::Imported => "imported",
            Progress::RefreshRequested => "refresh-requested",
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum DependentResult {
    /// Group written in the target
    Materialized,
    /// Group written in the target, replacing a back-reference to another entity
    Overwrote { previous: Fmri },
    /// A no-longer-declared dependent removed from its old target
    Retired,
    Failed(ExError),
}

#[derive(Debug, Clone)]
pub struct DependentOutcome {
    pub name: String,
    pub target: String,
    pub result: DependentResult,
}

#[derive(Debug, Clone)]
pub struct EntityReport {
    pub fmri: Fmri,
    pub progress: Progress,
    /// Entity was created (or reset from masked) by this call
    pub created: bool,
    /// Skipped because it changed or vanished under the call
    pub busy: bool,
    pub failures: Vec<ExError>,
    pub dependents: Vec<DependentOutcome>,
}

impl EntityReport {
    pub fn new(fmri: Fmri) -> Self {
        Self {
            fmri,
            progress: Progress::NotReached,
            created: false,
            busy: false,
            failures: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// Progress only ever moves forward
    pub fn advance(&mut self, progress: Progress) {
        if progress > self.progress {
            self.progress = progress;
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.busy
            && self.failures.is_empty()
            && self
                .dependents
                .iter()
                .all(|d| !matches!(d.result, DependentResult::Failed(_)))
    }
}

/// Overall outcome of a top-level call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Success,
    /// Completed, but some entities or groups failed
    Partial(ExErrorKind),
    /// Stopped early by a fatal error
    Aborted(ExErrorKind),
}

impl ReportStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ReportStatus::Success => "OK",
            ReportStatus::Partial(kind) | ReportStatus::Aborted(kind) => kind.code(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReportStatus::Success)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub request_id: Option<RequestId>,
    pub entries: Vec<EntityReport>,
    /// The error that aborted the call
    pub fatal: Option<ExError>,
    /// Entities whose dependent back-references were overwritten and need a look
    pub revisit: Vec<Fmri>,
    /// Bundle entries rejected before reaching the repository, e.g. bad names
    pub rejected: Vec<ExError>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, fmri: &Fmri) -> Option<&EntityReport> {
        self.entries.iter().find(|e| &e.fmri == fmri)
    }

    /// The entry for `fmri`, added at `NotReached` if missing
    pub fn entry_mut(&mut self, fmri: &Fmri) -> &mut EntityReport {
        match self.entries.iter().position(|e| &e.fmri == fmri) {
            Some(index) => &mut self.entries[index],
            None => {
                self.entries.push(EntityReport::new(fmri.clone()));
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.fatal.is_some()
    }

    /// Every recorded failure, dependents included
    pub fn failures(&self) -> impl Iterator<Item = &ExError> {
        self.rejected.iter().chain(self.entries.iter().flat_map(|e| {
            e.failures.iter().chain(e.dependents.iter().filter_map(|d| match &d.result {
                DependentResult::Failed(err) => Some(err),
                _ => None,
            }))
        }))
    }

    /// Fatal first, then the most severe local failure
    pub fn status(&self) -> ReportStatus {
        if let Some(fatal) = &self.fatal {
            return ReportStatus::Aborted(fatal.kind());
        }
        let rank = |d: Disposition| match d {
            Disposition::Fatal => 0,
            Disposition::SkipEntity => 1,
            Disposition::Busy => 2,
            Disposition::Structural => 3,
            Disposition::Adopt => 4,
        };
        let worst = self
            .failures()
            .map(ExError::kind)
            .min_by_key(|k| rank(k.disposition()));
        match worst {
            Some(kind) => ReportStatus::Partial(kind),
            None if self.entries.iter().any(|e| e.busy) => {
                ReportStatus::Partial(ExErrorKind::Deleted)
            }
            None => ReportStatus::Success,
        }
    }
}
