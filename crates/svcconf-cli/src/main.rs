//! svcconf CLI
//!
//! Command-line interface to the service configuration repository

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "svcconf")]
#[command(about = "svcconf - layered service configuration repository", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: commands::GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import bundles at the manifest layer
    Import(commands::import::ImportArgs),
    /// Apply a profile at a policy layer
    Apply(commands::apply::ApplyArgs),
    /// Snapshot operations
    Snapshot(commands::snapshot::SnapshotArgs),
    /// Remove what retired bundles contributed
    Cleanup(commands::cleanup::CleanupArgs),
    /// Print an entity's property groups
    Show(commands::show::ShowArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = commands::open_engine(&cli.global).and_then(|mut engine| match cli.command {
        Commands::Import(args) => commands::import::execute(args, &mut engine),
        Commands::Apply(args) => commands::apply::execute(args, &mut engine),
        Commands::Snapshot(args) => commands::snapshot::execute(args, &mut engine),
        Commands::Cleanup(args) => commands::cleanup::execute(args, &mut engine),
        Commands::Show(args) => commands::show::execute(args, &mut engine),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
