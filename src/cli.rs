// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;
use crate::types::BuildCacheMode;

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run tasks in parallel in dependency order, honouring resource locks.",
    long_about = None
)]
pub struct CliArgs {
    /// Tasks to run, together with everything they depend on.
    ///
    /// Default: every task in the config.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Number of parallel workers. Overrides `[config].workers`.
    #[arg(long, short = 'j', value_name = "N")]
    pub workers: Option<usize>,

    /// Keep running independent tasks after a failure.
    #[arg(long = "continue")]
    pub continue_on_failure: bool,

    /// Skip tasks matching this glob. Tasks only needed by skipped tasks are
    /// skipped too. May be repeated.
    #[arg(long, short = 'x', value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Build cache to use (none, memory, file). Overrides `[config].cache`.
    #[arg(long, value_name = "MODE")]
    pub cache: Option<BuildCacheMode>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print the execution order, but don't run anything.
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
