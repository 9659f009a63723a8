//! CLI command definitions for the `autoflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and inspect browser automation workflows.
#[derive(Parser)]
#[command(name = "autoflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true, env = "AUTOFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow file.
    Run {
        /// Path to the workflow file (.json, .yaml or .yml).
        file: PathBuf,

        /// Seed variable as KEY=VALUE. VALUE is parsed as JSON when it can be.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Opaque target reference handed to every action.
        #[arg(long)]
        target: Option<String>,

        /// Directory of workflows available to sub-workflow steps.
        #[arg(long, value_name = "DIR")]
        workflows: Option<PathBuf>,
    },

    /// Parse and validate a workflow file without running it.
    Validate {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// List workflows found under a directory.
    #[command(alias = "ls")]
    List {
        /// Directory to scan (defaults to `<data dir>/workflows`).
        dir: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
