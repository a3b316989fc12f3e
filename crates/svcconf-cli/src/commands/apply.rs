//! Profile apply command

use std::fs;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use svcconf_core::{Layer, StaticSchema};
use svcconf_engine::Engine;
use svcconf_store::SqliteConnector;

use super::{print_report, read_bundle, CliResult};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LayerArg {
    SystemPolicy,
    SitePolicy,
}

impl From<LayerArg> for Layer {
    fn from(arg: LayerArg) -> Self {
        match arg {
            LayerArg::SystemPolicy => Layer::SystemPolicy,
            LayerArg::SitePolicy => Layer::SitePolicy,
        }
    }
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Profile file (JSON bundle)
    pub profile: PathBuf,

    #[arg(long, value_enum, default_value = "site-policy")]
    pub layer: LayerArg,

    /// Schema table (JSON) used to type properties the repository has no type for
    #[arg(long)]
    pub schema: Option<PathBuf>,
}

pub fn execute(args: ApplyArgs, engine: &mut Engine<SqliteConnector>) -> CliResult {
    let profile = read_bundle(&args.profile)?;
    if let Some(path) = &args.schema {
        let schema: StaticSchema = serde_json::from_str(&fs::read_to_string(path)?)?;
        let config = engine.config().clone();
        *engine = Engine::sqlite(config)?.with_validator(schema);
    }

    println!("Applying {} at {}", profile.source, Layer::from(args.layer));
    let report = engine.apply_profile(&profile, args.layer.into());
    print_report(&report)
}
