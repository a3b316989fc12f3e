//! Bundle import command

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use svcconf_core::RefreshPolicy;
use svcconf_engine::Engine;
use svcconf_store::SqliteConnector;

use super::{print_report, read_bundle, CliResult};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RefreshArg {
    Never,
    Existing,
    All,
}

impl From<RefreshArg> for RefreshPolicy {
    fn from(arg: RefreshArg) -> Self {
        match arg {
            RefreshArg::Never => RefreshPolicy::Never,
            RefreshArg::Existing => RefreshPolicy::Existing,
            RefreshArg::All => RefreshPolicy::All,
        }
    }
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Bundle files (JSON), imported in order
    #[arg(required = true)]
    pub bundles: Vec<PathBuf>,

    /// Hold back general/enabled until "running" has been taken
    #[arg(long)]
    pub delayed_enable: bool,

    /// Which instances get a "running" snapshot and a refresh
    #[arg(long, value_enum)]
    pub refresh: Option<RefreshArg>,
}

pub fn execute(args: ImportArgs, engine: &mut Engine<SqliteConnector>) -> CliResult {
    let bundles = args
        .bundles
        .iter()
        .map(|path| read_bundle(path))
        .collect::<Result<Vec<_>, _>>()?;

    // The engine config is fixed once built, so overrides rebuild it
    if args.delayed_enable || args.refresh.is_some() {
        let mut config = engine.config().clone();
        config.import.delayed_enable |= args.delayed_enable;
        if let Some(refresh) = args.refresh {
            config.import.refresh = refresh.into();
        }
        *engine = Engine::sqlite(config)?;
    }

    for bundle in &bundles {
        println!("Importing {}", bundle.source);
        let report = engine.import_bundle(bundle);
        print_report(&report)?;
    }
    Ok(())
}
