use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fmri::Fmri;
use super::pg::PgContents;

/// Handle to a named snapshot of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub instance: Fmri,
    pub name: String,
    /// Changes each time the name is re-taken
    pub id: String,
    pub taken_at: DateTime<Utc>,
}

/// One entity's contribution to a snapshot
///
/// Snapshots list the service level first and the instance level last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snaplevel {
    pub entity: Fmri,
    /// Persistent groups only, as they were when the snapshot was taken
    pub property_groups: Vec<PgContents>,
}

impl Snaplevel {
    pub fn property_group(&self, name: &str) -> Option<&PgContents> {
        self.property_groups.iter().find(|pg| pg.name == name)
    }
}
