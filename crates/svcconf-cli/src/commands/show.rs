//! Entity display command

use clap::Args;
use svcconf_core::PgContents;
use svcconf_engine::{apply_engine_command, Engine, EngineCommand, EngineCommandResult};
use svcconf_store::SqliteConnector;

use super::{parse_fmri, CliResult};

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Service or instance FMRI, e.g. svc:/network/ssh:default
    pub fmri: String,

    /// Print the raw layered contents as JSON
    #[arg(long)]
    pub json: bool,
}

fn render(pg: &PgContents) -> String {
    let mut out = format!("{} ({})", pg.name, pg.pg_type);
    if pg.flags.non_persistent {
        out.push_str(" non-persistent");
    }
    for (name, property) in &pg.properties {
        let Some((layer, contribution)) = property.effective() else {
            continue;
        };
        let values: Vec<String> = contribution.values.iter().map(|v| v.to_string()).collect();
        out.push_str(&format!(
            "\n  {} {} = {} [{}]",
            name,
            contribution.value_type,
            values.join(" "),
            layer
        ));
    }
    out
}

pub fn execute(args: ShowArgs, engine: &mut Engine<SqliteConnector>) -> CliResult {
    let cmd = EngineCommand::Show {
        fmri: parse_fmri(&args.fmri)?,
    };
    let groups = match apply_engine_command(cmd, engine)? {
        EngineCommandResult::PropertyGroups(groups) => groups,
        other => return Err(format!("unexpected engine result: {:?}", other).into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else {
        for pg in &groups {
            println!("{}", render(pg));
        }
    }
    Ok(())
}
