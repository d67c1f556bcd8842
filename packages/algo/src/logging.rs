//! Tracing setup for hosts embedding the engine.
//!
//! The library itself only emits `tracing` events; installing a subscriber is left to the
//! host. `init_tracing` is a convenience for hosts without their own setup.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "lexis.log";

/// Keeps the non-blocking file writer alive; dropping it flushes pending lines.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("LEXIS_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

pub fn log_dir() -> PathBuf {
    std::env::var("LEXIS_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./logs"))
}

/// Install a global subscriber from `LEXIS_FILE_LOGS` / `LEXIS_LOG_DIR`.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    if file_logging_enabled() {
        init_tracing_to(log_level, Some(&log_dir()))
    } else {
        init_tracing_to(log_level, None)
    }
}

/// Install a global subscriber writing to stdout and, when `dir` is given, to a daily
/// rolling file inside it. A subscriber that is already installed is left in place.
pub fn init_tracing_to(log_level: &str, dir: Option<&Path>) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    if let Some(dir) = dir {
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!("failed to create log directory {}: {err}", dir.display());
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true);

            let installed = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init();
            if installed.is_err() {
                tracing::debug!("global subscriber already set, file logging not attached");
            }

            return Some(FileLogGuard { _guard: guard });
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();

    None
}
