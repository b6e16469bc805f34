//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::orchestrator::{DEFAULT_CONCURRENCY, DryRun};
use crate::stack::DEFAULT_ENGINE;

/// corch - Deploys constructs as dependency-ordered infrastructure stacks.
#[derive(Parser, Debug)]
#[command(name = "corch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the environment description.
    #[arg(short = 'f', long, global = true, env = "CORCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding state and generated programs
    /// (defaults to `.corch` next to the description).
    #[arg(long, global = true, env = "CORCH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Stack engine command.
    #[arg(long, global = true, env = "CORCH_ENGINE", default_value = DEFAULT_ENGINE)]
    pub engine: String,

    /// Command that turns a construct description into a stack program.
    #[arg(long, global = true, env = "CORCH_GENERATOR")]
    pub generator: Option<String>,

    /// Maximum constructs provisioned at once within a wave.
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample environment description.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Validate the environment description.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the actions and waves the next `up` would run.
    Plan,

    /// Create or update every declared construct and delete removed ones.
    Up {
        /// Stop short of deploying: `preview` (the default), `compile`
        /// (install and type-check) or `file-only` (write programs only).
        #[arg(
            long,
            value_enum,
            num_args = 0..=1,
            require_equals = true,
            default_missing_value = "preview"
        )]
        dry_run: Option<DryRun>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Destroy every construct recorded in state.
    Down {
        /// Not supported; rejected before anything runs.
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect or unlock the state file.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_flags_and_defaults() {
        let cli = Cli::try_parse_from(["corch", "-f", "env.yaml", "up", "--dry-run"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("env.yaml")));
        assert_eq!(cli.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(cli.output, OutputFormat::Text);
        assert!(matches!(
            cli.command,
            Commands::Up {
                dry_run: Some(DryRun::Preview),
                yes: false
            }
        ));
    }

    #[test]
    fn test_up_dry_run_modes() {
        let cli = Cli::try_parse_from(["corch", "up", "--dry-run=file-only", "--yes"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Up {
                dry_run: Some(DryRun::FileOnly),
                yes: true
            }
        ));

        let cli = Cli::try_parse_from(["corch", "up"]).expect("parse");
        assert!(matches!(cli.command, Commands::Up { dry_run: None, .. }));

        assert!(Cli::try_parse_from(["corch", "up", "--dry-run=off"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "corch",
            "state",
            "unlock",
            "--force",
            "--output",
            "json",
            "--state-dir",
            "/tmp/corch",
        ])
        .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/corch")));
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock {
                    lock_id: None,
                    force: true
                }
            }
        ));
    }

    #[test]
    fn test_concurrency_must_be_numeric() {
        assert!(Cli::try_parse_from(["corch", "--concurrency", "many", "plan"]).is_err());
    }
}
