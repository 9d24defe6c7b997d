// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `jobdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobdag",
    version,
    about = "Run a DAG of data jobs in dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// JSON file holding the DAG: an array of job specifications.
    #[arg(long, value_name = "PATH")]
    pub dag: PathBuf,

    /// Path to the config file (TOML). A missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "jobdag.toml")]
    pub config: PathBuf,

    /// Name of the DAG job; used in the `started_by` label of every job.
    ///
    /// Defaults to the DAG file name without extension.
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Team of jobs that do not name one.
    #[arg(long, value_name = "TEAM", default_value = "default")]
    pub team: String,

    /// Label the run as scheduled instead of manual.
    #[arg(long)]
    pub scheduled: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate and print the DAG without starting any job.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn dag_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.dag
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dag".to_string())
        })
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
