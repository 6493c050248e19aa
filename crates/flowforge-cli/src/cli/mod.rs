//! CLI command definitions for the `flowforge` binary.
//!
//! Uses clap derive macros for argument parsing. Every command works on a
//! workflow definition file (YAML or JSON) on disk.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Validate, simulate and run declarative workflows.
#[derive(Parser)]
#[command(name = "flowforge", version, about, long_about = None)]
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

    /// Engine configuration file (default: ./flowforge.toml).
    #[arg(long, global = true, env = "FLOWFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow definition and list its issues.
    Validate {
        /// Path to the workflow file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Walk a workflow without committing to it.
    #[command(alias = "sim")]
    Simulate {
        /// Path to the workflow file.
        file: PathBuf,

        /// Synthesize step outputs instead of calling executors.
        #[arg(long)]
        dry_run: bool,

        /// Initial variables as a JSON object.
        #[arg(long)]
        vars: Option<String>,
    },

    /// Execute a workflow and wait for it to finish.
    Run {
        /// Path to the workflow file.
        file: PathBuf,

        /// Initial variables as a JSON object.
        #[arg(long)]
        vars: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// How results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}
