//! Policy flags that shape reconciliation

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// What happens to `general/enabled` when an instance is reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnabledOnRevert {
    /// The live value survives the revert
    PreserveLive,
    /// The snapshot's value wins only if the snapshot records one
    #[default]
    SnapshotIfExplicit,
    /// Whatever the snapshot holds, including its absence
    Snapshot,
}

/// Which imported instances get a "running" snapshot and a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    Never,
    /// Only instances that existed before the import
    #[default]
    Existing,
    All,
}

impl RefreshPolicy {
    pub fn applies_to(&self, newly_created: bool) -> bool {
        match self {
            RefreshPolicy::Never => false,
            RefreshPolicy::Existing => !newly_created,
            RefreshPolicy::All => true,
        }
    }
}

/// Options for one bundle import
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Hold back `general/enabled` until dependents exist and "running"
    /// has been taken
    pub delayed_enable: bool,
    pub refresh: RefreshPolicy,
    pub retry: RetryPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_policy() {
        assert!(!RefreshPolicy::Never.applies_to(false));
        assert!(RefreshPolicy::Existing.applies_to(false));
        assert!(!RefreshPolicy::Existing.applies_to(true));
        assert!(RefreshPolicy::All.applies_to(true));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            EnabledOnRevert::default(),
            EnabledOnRevert::SnapshotIfExplicit
        );
        let opts = ImportOptions::default();
        assert!(!opts.delayed_enable);
        assert_eq!(opts.refresh, RefreshPolicy::Existing);
        assert_eq!(opts.retry.max_attempts, None);
    }
}
