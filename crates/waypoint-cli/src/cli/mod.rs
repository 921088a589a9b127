//! CLI command definitions for the `waypoint` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod checkpoints;
pub mod output;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and inspect checkpointed AI workflows.
#[derive(Parser)]
#[command(name = "waypoint", version, about, long_about = None)]
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

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory holding waypoint.toml and waypoint.db.
    #[arg(long, global = true, env = "WAYPOINT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow definition file.
    Validate {
        /// Path to a .yaml, .yml or .json definition.
        file: PathBuf,
    },

    /// Run a workflow definition to completion.
    Run {
        /// Path to a .yaml, .yml or .json definition.
        file: PathBuf,

        /// Execution input as a JSON object.
        #[arg(long)]
        input: Option<String>,

        /// Execution context as a JSON object.
        #[arg(long)]
        context: Option<String>,

        /// Cost ceiling in USD for this execution.
        #[arg(long)]
        budget: Option<f64>,

        /// Label to attach, as key=value (repeatable).
        #[arg(long = "label", value_parser = run::parse_label)]
        labels: Vec<(String, String)>,
    },

    /// Resume a paused, failed or interrupted execution from its checkpoint.
    Resume {
        /// Execution UUID.
        execution_id: String,

        /// Definition file the execution was started from.
        file: PathBuf,
    },

    /// Resume every interrupted execution whose definition is found in a
    /// directory.
    Recover {
        /// Directory searched recursively for definition files
        /// (default: `<data dir>/workflows`).
        dir: Option<PathBuf>,
    },

    /// Inspect and manage stored checkpoints.
    #[command(alias = "cp")]
    Checkpoints {
        #[command(subcommand)]
        action: checkpoints::CheckpointCommand,
    },
}
