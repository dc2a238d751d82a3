#![forbid(unsafe_code)]

use clap::{command, value_parser, Arg, ArgAction};
use color_eyre::eyre::Result;

use crate::commands::Command;

mod commands;
mod inventory;
mod logging;

use libfleet::log::*;

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre()?;

    // Command configuration
    let matches = command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vvvv.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all console output. Overridden by -v.")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            command!("run")
                .about("Run commands on every host in an inventory.")
                .arg(
                    Arg::new("hosts")
                        .help("Path to the host inventory (YAML or JSON). No default.")
                        .short('f')
                        .long("hosts"),
                )
                .arg(
                    Arg::new("jumphosts")
                        .help("Path to the jump host map (JSON or YAML).")
                        .short('j')
                        .long("jumphosts"),
                )
                .arg(
                    Arg::new("concurrency")
                        .help("Most hosts to connect to at once. Unbounded by default.")
                        .short('c')
                        .long("concurrency")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("connect-timeout")
                        .help("Seconds to wait for each connection leg.")
                        .short('t')
                        .long("connect-timeout")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("log-dir")
                        .help("Directory for the per-run log file.")
                        .long("log-dir")
                        .default_value("logs"),
                )
                .arg(
                    Arg::new("json")
                        .help("Print each host's outcome as a JSON line.")
                        .long("json")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    // Set up logging
    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose") as usize;
    let log_dir = matches
        .subcommand()
        .and_then(|(_, sub)| sub.get_one::<String>("log-dir").cloned());
    let _guard = logging::init_logging(quiet, verbose, log_dir.as_deref())?;

    // Run the commands
    if let Some((subcommand, matches)) = matches.subcommand() {
        let ctx = commands::CliContext::new(matches);
        debug!(
            "matched subcommand {} with matches: {:?}",
            &subcommand,
            &matches.ids().map(|id| id.as_str()).collect::<Vec<_>>()
        );
        match subcommand {
            "run" => commands::run::RunCommand::new().run(&ctx).await?,
            _ => return Err(commands::CommandErrors::InvalidSubcommand(subcommand.into()).into()),
        }
    }
    Ok(())
}
