//! Retired-bundle cleanup command

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use svcconf_core::Layer;
use svcconf_engine::{apply_engine_command, Engine, EngineCommand, EngineCommandResult};
use svcconf_store::SqliteConnector;

use super::{read_bundle, CliResult};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CleanupLayerArg {
    Manifest,
    SystemPolicy,
    SitePolicy,
}

impl From<CleanupLayerArg> for Layer {
    fn from(arg: CleanupLayerArg) -> Self {
        match arg {
            CleanupLayerArg::Manifest => Layer::Manifest,
            CleanupLayerArg::SystemPolicy => Layer::SystemPolicy,
            CleanupLayerArg::SitePolicy => Layer::SitePolicy,
        }
    }
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Sources that are still delivered; every other source at the layer is removed
    #[arg(long = "live")]
    pub live: Vec<String>,

    /// Bundle files whose sources are still delivered
    #[arg(long = "live-bundle")]
    pub live_bundles: Vec<PathBuf>,

    #[arg(long, value_enum, default_value = "manifest")]
    pub layer: CleanupLayerArg,
}

pub fn execute(args: CleanupArgs, engine: &mut Engine<SqliteConnector>) -> CliResult {
    let mut live: BTreeSet<String> = args.live.into_iter().collect();
    for path in &args.live_bundles {
        live.insert(read_bundle(path)?.source);
    }

    let cmd = EngineCommand::CleanupBundles {
        live,
        layer: args.layer.into(),
    };
    match apply_engine_command(cmd, engine)? {
        EngineCommandResult::Cleaned(removed) if removed.is_empty() => {
            println!("Nothing to clean up");
        }
        EngineCommandResult::Cleaned(removed) => {
            for (source, outcome) in removed {
                println!(
                    "Removed {}: {} groups deleted, {} properties retracted, {} entities deleted",
                    source,
                    outcome.deleted_groups.len(),
                    outcome.retracted_properties,
                    outcome.deleted_entities.len()
                );
            }
        }
        other => return Err(format!("unexpected engine result: {:?}", other).into()),
    }
    Ok(())
}
