//! Home directory resolution.
//!
//! # Precedence
//!
//! 1. `TURNKEEPER_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! Tests point `TURNKEEPER_HOME` at a temporary directory so that global
//! config lookups never touch the real home.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory used for global configuration.
///
/// # Errors
///
/// Returns an error if `TURNKEEPER_HOME` is unset and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("TURNKEEPER_HOME") {
        let trimmed = home.trim_end_matches(['/', '\\']);
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir().context("could not determine home directory; set TURNKEEPER_HOME")
}

/// Path of the global config file under `home`.
pub fn global_config_path(home: &std::path::Path) -> PathBuf {
    home.join(".config").join("turnkeeper").join("config.toml")
}
