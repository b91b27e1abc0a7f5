//! Command-line interface for change-forge.
//!
//! Provides commands for single-location crops, multi-disaster processing,
//! and the catalog and download steps that feed them.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
