//! turnkeeper: inspect controller configuration and replay scenarios.
//!
//! # Subcommands
//!
//! - `config`  Show resolved configuration
//! - `replay`  Drive a controller against a scripted host

use clap::Parser;
use turnkeeper_core::logging;

use turnkeeper::cli::{Cli, Commands};
use turnkeeper::commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(args) => commands::config_cmd::run(&cli.config, args).await,
        Commands::Replay(args) => commands::replay::run(&cli.config, args).await,
    }
}
