//! turnkeeper library crate.
//!
//! CLI argument types and subcommand implementations for the `turnkeeper`
//! binary. Exposed as a library for integration testing.

pub mod cli;
pub mod commands;
