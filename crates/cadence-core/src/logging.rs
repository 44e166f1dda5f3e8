//! Logging setup using tracing
//!
//! Logs always go to a daily-rolling file. Stdout belongs to command
//! output, so the optional console echo writes to stderr.

use std::io;
use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "CADENCE_LOG";

/// Environment variable overriding the log directory.
pub const LOG_DIR_ENV_VAR: &str = "CADENCE_LOG_DIR";

const DEFAULT_FILTER: &str = "cadence=info,warn";
const LOG_FILE_PREFIX: &str = "cadence.log";

/// Where log lines go besides the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Also write human-readable lines to stderr.
    pub echo_stderr: bool,
}

/// Initialize the logging subsystem.
///
/// Logs are written to `~/.local/share/cadence/logs/` unless
/// `CADENCE_LOG_DIR` says otherwise. The filter comes from `CADENCE_LOG`.
///
/// # Examples
/// ```bash
/// CADENCE_LOG=debug cadence status
/// CADENCE_LOG=cadence_client=trace cadence --verbose listen progress
/// ```
pub fn init(options: LogOptions) -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ));

    let stderr_layer = options.echo_stderr.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        "cadence {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Directory the rolling log files are written to.
pub fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV_VAR).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join("logs")
}
