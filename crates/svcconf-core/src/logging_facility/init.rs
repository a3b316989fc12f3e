//! Logging initialization

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Crates whose events pass the default filter
const SVCCONF_TARGETS: [&str; 4] = ["svcconf", "svcconf_core", "svcconf_store", "svcconf_engine"];

/// Logging profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Human-readable lines on stderr, debug level
    #[default]
    Development,
    /// One JSON object per event on stderr, info level
    Production,
    /// Nothing is written; tests install the capture layer themselves
    Test,
}

impl Profile {
    fn level(self) -> Option<Level> {
        match self {
            Profile::Development => Some(Level::DEBUG),
            Profile::Production => Some(Level::INFO),
            Profile::Test => None,
        }
    }

    /// `RUST_LOG` when set, otherwise the profile level for svcconf crates only
    fn filter(self) -> EnvFilter {
        if let Ok(from_env) = EnvFilter::try_from_default_env() {
            return from_env;
        }
        match self.level() {
            Some(level) => {
                let directives: Vec<String> = SVCCONF_TARGETS
                    .iter()
                    .map(|target| format!("{}={}", target, level))
                    .collect();
                EnvFilter::new(directives.join(","))
            }
            None => EnvFilter::new("off"),
        }
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber for `profile`
///
/// Only the first call in a process has any effect. A subscriber installed
/// earlier by someone else is left in place.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let filter = profile.filter();
        let installed = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish()
                .try_init(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_current_span(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish()
                .try_init(),
            Profile::Test => tracing_subscriber::registry().try_init(),
        };
        if installed.is_err() {
            tracing::debug!(?profile, "global subscriber already set");
        }
    });
}
