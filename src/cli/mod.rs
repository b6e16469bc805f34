//! CLI module for the `corch` binary.
//!
//! This module provides the command-line surface and the formatting of
//! plans, run summaries, state and progress events.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
