//! Logging setup.
//!
//! Every run leaves a plain-text `rehost.log` behind, in `LOG_DIR` or the
//! system temp dir, next to the stderr output.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogSettings;

/// Name of the log file written under the log directory.
pub const LOG_FILE_NAME: &str = "rehost.log";

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file: {0}")]
    File(#[from] InitError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the file writer flushing; hold it until exit.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard(#[allow(dead_code)] WorkerGuard);

/// Filter used for `settings`: `RUST_LOG` wins over `LOG_LEVEL`, `verbose`
/// wins over both.
#[must_use]
pub fn env_filter(settings: &LogSettings, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}

/// Install the global subscriber.
///
/// Events go to stderr, as JSON lines when `settings.json` is set, and are
/// always copied to `<dir>/rehost.log`.
///
/// # Errors
/// Returns error if the log file cannot be opened or a subscriber is
/// already installed.
pub fn init(settings: &LogSettings, verbose: bool) -> Result<LogGuard, LoggingError> {
    let stderr_layer = if settings.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (writer, guard) = file_writer(&settings.dir)?;
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter(settings, verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogGuard(guard))
}

/// Non-blocking writer appending to `<dir>/rehost.log`.
fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}
