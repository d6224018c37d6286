use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;

mod args;
mod codec;
mod dump;
mod env;
mod error;
mod http;
mod list_metrics;
mod logging;
mod push;
mod shutdown;
mod ui;
mod utils;

use crate::args::CLIArgs;

const DEFAULT_CANARY_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-canary.dev");
const CLI_VERSION: &str = match option_env!("PROMDUMP_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_CANARY_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "promdump",
    about = "Dump Prometheus metrics to NDJSON files and push them to VictoriaMetrics",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Dump a time window from a Prometheus-compatible API to NDJSON files
    Dump(CLIArgs<dump::DumpArgs>),
    /// Push dumped files to a VictoriaMetrics import endpoint
    Push(CLIArgs<push::PushArgs>),
    /// List the metric names an exporter exposes
    ListMetrics(CLIArgs<list_metrics::ListMetricsArgs>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    logging::init();
    let cli = Cli::parse_from(argv);

    match cli.command {
        Commands::Dump(cmd) => dump::run(cmd.base, cmd.args).await?,
        Commands::Push(cmd) => push::run(cmd.base, cmd.args).await?,
        Commands::ListMetrics(cmd) => list_metrics::run(cmd.base, cmd.args).await?,
    }

    Ok(())
}
