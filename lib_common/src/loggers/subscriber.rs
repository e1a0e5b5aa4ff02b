//! # Process Logging
//!
//! Installs the global `tracing` subscriber for a long-running process:
//!
//! - stdout, human readable
//! - `<dir>/<process>_debug.<date>.log.jsonl`, enabled levels below WARN, JSON lines
//! - `<dir>/<process>_error.<date>.log.jsonl`, WARN and above only
//!
//! Files roll daily and only the newest `keep_files` of each kind are kept.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing::Level;
use tracing_subscriber::filter::{LevelFilter, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file: {0}")]
    Appender(#[from] InitError),

    #[error("a global subscriber is already installed: {0}")]
    Init(#[from] TryInitError),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// # Logger Options
pub struct LoggerOptions {
    /// Used as the file name prefix.
    pub process_name: String,
    /// Directory for the JSON-lines files. `None` logs to stdout only.
    pub log_dir: Option<PathBuf>,
    /// Default filter directive (e.g. "info", "lib_common=debug"). `RUST_LOG` wins if set.
    pub level: String,
    /// Rolled files kept per kind.
    pub keep_files: usize,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            process_name: "app".to_string(),
            log_dir: Some(PathBuf::from("./logs")),
            level: "info".to_string(),
            keep_files: 7,
        }
    }
}

/// Flushes the file writers on drop. Keep it alive for the whole of `main`.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn appender(options: &LoggerOptions, dir: &Path, kind: &str) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(format!("{}_{}", options.process_name, kind))
        .filename_suffix("log.jsonl")
        .max_log_files(options.keep_files.max(1))
        .build(dir)
}

/// Installs the subscriber. Fails if one is already installed.
pub fn setup_logging(options: &LoggerOptions) -> Result<LoggingGuards, LoggerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.level));
    let console = fmt::layer().with_target(true);

    let Some(dir) = &options.log_dir else {
        tracing_subscriber::registry().with(filter).with(console).try_init()?;
        return Ok(LoggingGuards { _guards: Vec::new() });
    };

    std::fs::create_dir_all(dir).map_err(|source| LoggerError::LogDir {
        path: dir.clone(),
        source,
    })?;

    let (debug_writer, debug_guard) = tracing_appender::non_blocking(appender(options, dir, "debug")?);
    let (error_writer, error_guard) = tracing_appender::non_blocking(appender(options, dir, "error")?);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(debug_writer)
                .with_filter(filter_fn(|meta| *meta.level() > Level::WARN)),
        )
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::WARN),
        )
        .try_init()?;

    Ok(LoggingGuards {
        _guards: vec![debug_guard, error_guard],
    })
}
