// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dagrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagrun",
    version,
    about = "Run DAGs of shell steps on a wall-clock schedule.",
    long_about = None
)]
pub struct CliArgs {
    /// Directory containing workflow YAML files.
    #[arg(long, value_name = "DIR", default_value = "dags")]
    pub dags: String,

    /// Directory for execution history.
    #[arg(long, value_name = "DIR", default_value = ".dagrun/data")]
    pub data_dir: String,

    /// Base configuration merged underneath every workflow.
    #[arg(long, value_name = "PATH")]
    pub base_config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and print all workflows with their schedules, then exit without
    /// starting the scheduler.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
