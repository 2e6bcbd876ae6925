// src/logging.rs

//! Logging setup for `rundag` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining what gets logged:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `RUNDAG_LOG` environment variable, either a plain level ("debug") or
//!    full filter directives ("rundag::dag=trace,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR; STDOUT carries the dry-run listing and the
//! run summary.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV_VAR: &str = "RUNDAG_LOG";

/// Initialise the global logging subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(level_directive(lvl)),
        None => env_filter(),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

fn env_filter() -> EnvFilter {
    match std::env::var(LOG_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => {
            EnvFilter::try_new(value.trim().to_lowercase()).unwrap_or_else(|err| {
                eprintln!("ignoring invalid {LOG_ENV_VAR} value '{value}': {err}");
                EnvFilter::new("info")
            })
        }
        _ => EnvFilter::new("info"),
    }
}

fn level_directive(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
