//! `config` subcommand: show resolved configuration.
//!
//! Loads the resolved configuration and prints it either as JSON (`--json`)
//! or as a human-readable key=value table.

use crate::cli::ConfigArgs;
use std::path::PathBuf;
use turnkeeper_core::config::{ControllerConfig, ResolvedConfig, resolve_config};

/// Run the `config` subcommand.
///
/// # Errors
///
/// Returns an error if config resolution fails (e.g., unreadable TOML file or
/// current directory cannot be determined).
pub async fn run(config_path: &Option<PathBuf>, args: ConfigArgs) -> anyhow::Result<()> {
    let resolved: ResolvedConfig = resolve_config(config_path.as_deref())?;
    let cfg: &ControllerConfig = &resolved.controller;

    if args.json {
        let json = serde_json::to_string_pretty(cfg)?;
        println!("{json}");
    } else {
        println!("turnkeeper configuration:");
        println!(
            "  source                       = {}",
            resolved
                .source
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<defaults>".to_string())
        );
        println!("  queue_capacity               = {}", cfg.queue_capacity);
        println!("  debounce_ms                  = {}", cfg.debounce_ms);
        println!(
            "  environment_poll_interval_ms = {}",
            cfg.environment_poll_interval_ms
        );
        println!("  recovery_poll_attempts       = {}", cfg.recovery_poll_attempts);
        println!(
            "  recovery_poll_interval_ms    = {}",
            cfg.recovery_poll_interval_ms
        );
        println!("  send_settle_ms               = {}", cfg.send_settle_ms);
        println!("  recovery_cooldown_ms         = {}", cfg.recovery_cooldown_ms);
        println!("  advisory_text                = {}", cfg.advisory_text);
    }

    Ok(())
}
