//! Engine configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [repository]
//! path = ".svcconf/repository.db"
//!
//! [import]
//! delayed_enable = false
//! refresh = "existing"
//!
//! [revert]
//! enabled = "snapshot_if_explicit"
//!
//! [transaction]
//! max_attempts = 0
//!
//! [logging]
//! profile = "development"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use svcconf_core::errors::{ExError, ExErrorKind, Result};
use svcconf_core::logging_facility::Profile;
use svcconf_core::{EnabledOnRevert, ImportOptions, RefreshPolicy, RetryPolicy};

/// Environment variable naming the config file when none is given
pub const CONFIG_ENV_VAR: &str = "SVCCONF_CONFIG";

pub const DEFAULT_REPOSITORY_PATH: &str = ".svcconf/repository.db";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub repository: RepositoryConfig,
    pub import: ImportConfig,
    pub revert: RevertConfig,
    pub transaction: TransactionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub path: PathBuf,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_REPOSITORY_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    pub delayed_enable: bool,
    pub refresh: RefreshPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RevertConfig {
    pub enabled: EnabledOnRevert,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionConfig {
    /// Conflict retries per write; 0 retries until the commit succeeds
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub profile: Profile,
}

impl EngineConfig {
    /// Load configuration from `path`, or the defaults if it does not exist
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, `InvalidInput` when it is not a
    /// valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file does not exist, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("load_config")
                .with_message(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text).map_err(|e| {
            let message = format!("failed to parse {}: {}", path.display(), e.message());
            e.with_message(message)
        })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// # Errors
    ///
    /// `InvalidInput` for malformed TOML or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::InvalidInput)
                .with_op("load_config")
                .with_message(e.to_string())
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_max_attempts(self.transaction.max_attempts)
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            delayed_enable: self.import.delayed_enable,
            refresh: self.import.refresh,
            retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(
            config.repository.path,
            PathBuf::from(DEFAULT_REPOSITORY_PATH)
        );
        assert_eq!(config.retry_policy(), RetryPolicy::unbounded());
        assert_eq!(config.import.refresh, RefreshPolicy::Existing);
        assert_eq!(config.revert.enabled, EnabledOnRevert::SnapshotIfExplicit);
    }

    #[test]
    fn test_full_config() {
        let config = EngineConfig::from_toml(
            r#"
            [repository]
            path = "/var/svc/repo.db"

            [import]
            delayed_enable = true
            refresh = "all"

            [revert]
            enabled = "preserve_live"

            [transaction]
            max_attempts = 3

            [logging]
            profile = "production"
            "#,
        )
        .unwrap();

        assert_eq!(config.repository.path, PathBuf::from("/var/svc/repo.db"));
        let options = config.import_options();
        assert!(options.delayed_enable);
        assert_eq!(options.refresh, RefreshPolicy::All);
        assert_eq!(options.retry, RetryPolicy::bounded(3));
        assert_eq!(config.revert.enabled, EnabledOnRevert::PreserveLive);
        assert_eq!(config.logging.profile, Profile::Production);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EngineConfig::from_toml("[import]\nrefresh_all = true\n").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_bad_enum_value_rejected() {
        let err = EngineConfig::from_toml("[import]\nrefresh = \"sometimes\"\n").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }
}
