//! CLI argument types for turnkeeper.
//!
//! Defines the top-level [`Cli`] struct and all subcommand [`Args`] using
//! clap's derive macros. Each subcommand maps to a module in
//! [`crate::commands`].

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Interaction controller for single-flight conversational agents
#[derive(Parser, Debug)]
#[command(name = "turnkeeper", version, about)]
pub struct Cli {
    /// Path to a turnkeeper.toml config file (default: auto-detected)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show resolved configuration
    Config(ConfigArgs),
    /// Replay a scripted scenario against an in-memory host
    Replay(ReplayArgs),
}

/// Arguments for the `config` subcommand
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `replay` subcommand
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Scenario file (TOML)
    pub scenario: PathBuf,

    /// Print events and the final summary as JSON lines
    #[arg(long)]
    pub json: bool,
}
