//! Snapshot commands

use clap::{Args, Subcommand};
use svcconf_engine::{apply_engine_command, Engine, EngineCommand, EngineCommandResult};
use svcconf_store::SqliteConnector;

use super::{parse_fmri, CliResult};

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Take or replace a named snapshot of an instance
    Take {
        instance: String,
        #[arg(long, default_value = "running")]
        name: String,
    },
    /// Revert an instance to a snapshot
    Restore { instance: String, name: String },
    /// List an instance's snapshots
    List { instance: String },
}

pub fn execute(args: SnapshotArgs, engine: &mut Engine<SqliteConnector>) -> CliResult {
    let cmd = match args.command {
        SnapshotCommand::Take { instance, name } => EngineCommand::TakeSnapshot {
            instance: parse_fmri(&instance)?,
            name,
        },
        SnapshotCommand::Restore { instance, name } => EngineCommand::RestoreSnapshot {
            instance: parse_fmri(&instance)?,
            name,
        },
        SnapshotCommand::List { instance } => EngineCommand::ListSnapshots {
            instance: parse_fmri(&instance)?,
        },
    };

    match apply_engine_command(cmd, engine)? {
        EngineCommandResult::SnapshotTaken(Some(snapshot)) => {
            println!("Snapshot taken: {} ({})", snapshot.name, snapshot.id);
        }
        EngineCommandResult::SnapshotTaken(None) => {
            return Err("instance was deleted while taking the snapshot".into());
        }
        EngineCommandResult::SnapshotRestored(outcome) => {
            println!(
                "Restored {} ({} property groups)",
                outcome.restored.name, outcome.groups_restored
            );
            if let Some(previous) = outcome.previous {
                println!("  previous state saved as {}", previous.name);
            }
            if outcome.enabled_preserved {
                println!("  live enabled state preserved");
            }
        }
        EngineCommandResult::Snapshots(snapshots) => {
            for snapshot in snapshots {
                println!("{}\t{}", snapshot.name, snapshot.taken_at.to_rfc3339());
            }
        }
        other => return Err(format!("unexpected engine result: {:?}", other).into()),
    }
    Ok(())
}
