//! Logging initialisation: console output plus a daily-rotated file.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default logging target when `RUST_LOG` is not provided.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Available output formats for the console logger.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable logs.
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Configure and install the global tracing subscriber.
///
/// Lines reach both the console and a daily-rotated file under `log/`
/// (`portwayapi.YYYY-MM-DD.log`). The returned guard must stay alive for
/// the process lifetime; dropping it stops the background writer.
///
/// # Errors
///
/// Returns an error if the file appender cannot be created or another
/// subscriber is already installed.
pub fn init_logging(log_dir: &Path, format: LogFormat) -> Result<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("portwayapi")
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|err| anyhow!("failed to create rolling log appender: {err}"))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(false)
        .with_writer(file_writer);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?,
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_logging_creates_the_log_directory_writer() {
        let dir = TempDir::new().expect("tempdir");
        // Only the first install in the process can succeed; either way the
        // appender must have been constructible.
        let _ = init_logging(dir.path(), LogFormat::Pretty);
    }
}
