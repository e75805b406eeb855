//! Command-line scenario runner for the staking economics engine.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod scenario;

/// Simulates validator-set economics epoch by epoch.
#[derive(Debug, Parser)]
#[command(name = "staking-sim", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a scenario file and print one JSON record per epoch.
    Run(commands::run::Command),
    /// Print the voting power derived from a list of stakes.
    VotingPower(commands::voting_power::Command),
}

fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match Cli::parse().command {
        Commands::Run(command) => command.execute(),
        Commands::VotingPower(command) => command.execute(),
    }
}
