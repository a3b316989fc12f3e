//! Subcommands and the plumbing they share

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use svcconf_core::logging_facility;
use svcconf_core::reconcile::DependentResult;
use svcconf_core::{Bundle, ExError, ExErrorKind, Fmri, ReconcileReport};
use svcconf_engine::config::CONFIG_ENV_VAR;
use svcconf_engine::{Engine, EngineConfig};
use svcconf_store::SqliteConnector;

pub mod apply;
pub mod cleanup;
pub mod import;
pub mod show;
pub mod snapshot;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Engine configuration file (defaults to $SVCCONF_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository database, overriding the configuration
    #[arg(long, global = true)]
    pub repository: Option<PathBuf>,
}

fn load_config(global: &GlobalArgs) -> Result<EngineConfig, ExError> {
    let path = global
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    let mut config = match path {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(repository) = &global.repository {
        config.repository.path = repository.clone();
    }
    Ok(config)
}

pub fn open_engine(
    global: &GlobalArgs,
) -> Result<Engine<SqliteConnector>, Box<dyn std::error::Error>> {
    let config = load_config(global)?;
    logging_facility::init(config.logging.profile);
    Ok(Engine::sqlite(config)?)
}

/// Read a bundle in its JSON form
pub fn read_bundle(path: &Path) -> Result<Bundle, ExError> {
    let text = fs::read_to_string(path).map_err(|e| {
        ExError::new(ExErrorKind::Io)
            .with_op("read_bundle")
            .with_message(format!("failed to read {}: {}", path.display(), e))
    })?;
    Bundle::from_json(&text).map_err(|e| {
        let message = format!("{}: {}", path.display(), e.message());
        e.with_message(message)
    })
}

pub fn parse_fmri(text: &str) -> Result<Fmri, ExError> {
    Ok(Fmri::parse(text)?)
}

/// Print the per-entity progress table; fails unless the call fully succeeded
pub fn print_report(report: &ReconcileReport) -> CliResult {
    for rejected in &report.rejected {
        println!("rejected: {}", rejected);
    }
    for entry in &report.entries {
        let mut flags = Vec::new();
        if entry.created {
            flags.push("created");
        }
        if entry.busy {
            flags.push("busy");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        println!("{}: {}{}", entry.fmri, entry.progress, flags);
        for failure in &entry.failures {
            println!("  failed: {}", failure);
        }
        for dependent in &entry.dependents {
            match &dependent.result {
                DependentResult::Materialized => {
                    println!("  dependent {} -> {}", dependent.name, dependent.target)
                }
                DependentResult::Overwrote { previous } => println!(
                    "  dependent {} -> {} (replaced back-reference to {})",
                    dependent.name, dependent.target, previous
                ),
                DependentResult::Retired => {
                    println!(
                        "  dependent {} retired from {}",
                        dependent.name, dependent.target
                    )
                }
                DependentResult::Failed(e) => {
                    println!(
                        "  dependent {} -> {} failed: {}",
                        dependent.name, dependent.target, e
                    )
                }
            }
        }
    }
    for fmri in &report.revisit {
        println!("revisit: {}", fmri);
    }

    if let Some(fatal) = &report.fatal {
        return Err(fatal.clone().into());
    }
    let status = report.status();
    if !status.is_success() {
        return Err(format!("completed with failures ({})", status.code()).into());
    }
    Ok(())
}
