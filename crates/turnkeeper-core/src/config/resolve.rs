//! Config resolution.
//!
//! Resolves [`ControllerConfig`] from multiple sources with the following
//! priority (highest to lowest):
//!
//! 1. Environment variables (`TURNKEEPER_*`)
//! 2. An explicit config file path
//! 3. `turnkeeper.toml` in the search directory
//! 4. Global `~/.config/turnkeeper/config.toml`
//! 5. Compiled-in defaults (via [`ControllerConfig::default`])
//!
//! Only the first file found among 2 to 4 is read. A missing `[controller]`
//! table in that file means defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use super::types::ControllerConfig;
use crate::home::{get_home_dir, global_config_path};

/// File name looked up in the search directory.
pub const LOCAL_CONFIG_FILE: &str = "turnkeeper.toml";

/// Where the file layer of the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No file was found; defaults plus environment.
    Defaults,
    /// The file given explicitly.
    Explicit(PathBuf),
    /// `turnkeeper.toml` in the search directory.
    Local(PathBuf),
    /// The global config under the home directory.
    Global(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Defaults => None,
            Self::Explicit(p) | Self::Local(p) | Self::Global(p) => Some(p),
        }
    }
}

/// Configuration plus its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub controller: ControllerConfig,
    pub source: ConfigSource,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    controller: Option<ControllerConfig>,
}

/// Resolve the configuration using the current directory and home directory.
///
/// # Errors
///
/// Returns an error if the current directory or home directory cannot be
/// determined, or if the selected config file cannot be read or parsed.
pub fn resolve_config(config_path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let current_dir = std::env::current_dir()?;
    // The home directory only matters when no nearer file exists.
    let home_dir = get_home_dir().ok();
    resolve_config_from(config_path, &current_dir, home_dir.as_deref())
}

/// Resolve the configuration against explicit search and home directories.
///
/// # Errors
///
/// Returns an error if the selected config file cannot be read or parsed.
pub fn resolve_config_from(
    config_path: Option<&Path>,
    search_dir: &Path,
    home_dir: Option<&Path>,
) -> anyhow::Result<ResolvedConfig> {
    let source = select_source(config_path, search_dir, home_dir);

    let mut controller = match source.path() {
        Some(path) => load_file(path)?,
        None => ControllerConfig::default(),
    };

    apply_env_overrides(&mut controller);

    Ok(ResolvedConfig {
        controller: controller.normalized(),
        source,
    })
}

fn select_source(
    config_path: Option<&Path>,
    search_dir: &Path,
    home_dir: Option<&Path>,
) -> ConfigSource {
    if let Some(path) = config_path {
        return ConfigSource::Explicit(path.to_path_buf());
    }
    let local = search_dir.join(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return ConfigSource::Local(local);
    }
    if let Some(home) = home_dir {
        let global = global_config_path(home);
        if global.is_file() {
            return ConfigSource::Global(global);
        }
    }
    ConfigSource::Defaults
}

fn load_file(path: &Path) -> anyhow::Result<ControllerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(file.controller.unwrap_or_default())
}

/// Apply `TURNKEEPER_*` environment variable overrides to `cfg`.
///
/// Values that fail to parse are ignored.
fn apply_env_overrides(cfg: &mut ControllerConfig) {
    if let Some(v) = env_parse::<usize>("TURNKEEPER_QUEUE_CAPACITY") {
        cfg.queue_capacity = v;
    }
    if let Some(v) = env_parse::<u64>("TURNKEEPER_DEBOUNCE_MS") {
        cfg.debounce_ms = v;
    }
    if let Some(v) = env_parse::<u64>("TURNKEEPER_POLL_INTERVAL_MS") {
        cfg.environment_poll_interval_ms = v;
    }
    if let Some(v) = env_parse::<u32>("TURNKEEPER_RECOVERY_POLL_ATTEMPTS") {
        cfg.recovery_poll_attempts = v;
    }
    if let Some(v) = env_parse::<u64>("TURNKEEPER_RECOVERY_POLL_INTERVAL_MS") {
        cfg.recovery_poll_interval_ms = v;
    }
    if let Some(v) = env_parse::<u64>("TURNKEEPER_SEND_SETTLE_MS") {
        cfg.send_settle_ms = v;
    }
    if let Some(v) = env_parse::<u64>("TURNKEEPER_RECOVERY_COOLDOWN_MS") {
        cfg.recovery_cooldown_ms = v;
    }
    if let Ok(v) = std::env::var("TURNKEEPER_ADVISORY_TEXT") {
        if !v.trim().is_empty() {
            cfg.advisory_text = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
