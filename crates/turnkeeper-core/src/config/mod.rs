//! Configuration for the interaction controller.
//!
//! The entry point is [`resolve_config`], which loads the `[controller]`
//! table from a TOML file into a [`ControllerConfig`] and applies
//! `TURNKEEPER_*` environment overrides.
//!
//! See [`resolve`] for the full priority chain and [`types`] for all fields.

mod resolve;
mod types;

pub use resolve::{ConfigSource, ResolvedConfig, resolve_config, resolve_config_from};
pub use types::ControllerConfig;
