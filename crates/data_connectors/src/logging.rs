//! Structured logging setup with console and file output.
//!
//! Provides:
//! - Daily rotating log files
//! - Build-type conditional log levels
//! - Console-only fallback when file logging fails
//! - Environment variable override via CONNECTORS_LOG or RUST_LOG
//!
//! The library only emits `tracing` events; calling [`init_logging`] is up to
//! the host application.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "CONNECTORS_LOG";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Whether stdout is a terminal (stdout-only logging)
    pub is_pty: bool,
    /// Optional custom log filter
    pub log_filter: Option<String>,
}

impl LogConfig {
    /// Create a new logging configuration.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir, is_pty: atty::is(atty::Stream::Stdout), log_filter: None }
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(log_dir())
    }
}

/// Guard that must be held for as long as events should reach the log file.
///
/// Dropping this guard flushes pending log entries.
pub struct LoggingGuard {
    worker_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether events are also written to a log file.
    pub fn has_file_output(&self) -> bool {
        self.worker_guard.is_some()
    }
}

/// Install the global subscriber.
///
/// If file logging cannot be set up, falls back to console-only. Installing
/// twice is a no-op for the second call.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    if config.is_pty {
        return init_stdout_logging(config.log_filter.as_deref());
    }

    match init_file_logging(&config) {
        Ok(guard) => LoggingGuard { worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {}. Using console only.", e);
            init_stdout_logging(config.log_filter.as_deref())
        }
    }
}

/// Initialize with defaults.
pub fn init_logging_default() -> LoggingGuard {
    init_logging(LogConfig::default())
}

fn init_stdout_logging(filter: Option<&str>) -> LoggingGuard {
    let env_filter = build_env_filter(filter);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .try_init();

    LoggingGuard { worker_guard: None }
}

fn init_file_logging(config: &LogConfig) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("data_connectors")
        .filename_suffix("log")
        .build(&config.log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout = std::io::stdout.with_max_level(tracing::Level::INFO);
    let combined = stdout.and(non_blocking);

    let env_filter = build_env_filter(config.log_filter.as_deref());

    tracing_subscriber::fmt()
        .with_writer(combined)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(guard)
}

/// Build the filter: custom filter > CONNECTORS_LOG > RUST_LOG > default.
fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Default log filter for the build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        concat!(
            "info,data_connectors=debug,",
            "tokio_postgres=warn,russh=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn"
        )
    }
    #[cfg(not(debug_assertions))]
    {
        concat!(
            "warn,data_connectors=info,",
            "tokio_postgres=warn,russh=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn"
        )
    }
}

/// Default log directory under the platform's local data directory.
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("data_connectors")
        .join("logs")
}
