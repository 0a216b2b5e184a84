//! relay-admin: inspect, monitor and administer a single Nostr relay.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{count::CountArgs, info::InfoArgs, monitor::MonitorArgs, whitelist::WhitelistArgs};
use config::AdminConfig;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "relay-admin", about = "Nostr relay administration", version)]
struct Cli {
    /// JSON config file with `session` and `sampler` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the relay's NIP-11 information document
    Info(InfoArgs),
    /// Ask the relay how many events match a filter
    Count(CountArgs),
    /// Sample latency, uptime and kind-1 activity
    Monitor(MonitorArgs),
    /// Publish a kind 25000 whitelist event
    Whitelist(WhitelistArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => AdminConfig::load(path)?,
        None => AdminConfig::default(),
    };

    match cli.command {
        Commands::Info(args) => commands::info::run(args).await,
        Commands::Count(args) => commands::count::run(args, &config).await,
        Commands::Monitor(args) => commands::monitor::run(args, &config).await,
        Commands::Whitelist(args) => commands::whitelist::run(args, &config).await,
    }
}

// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
