//! Tracing setup for hosts embedding the store
//!
//! Logs go to `PathManager::log_file_path()` (or stderr when no data
//! directory can be determined). The library crates only emit events; the
//! host process decides where they land by calling `init_logging` once.

use crate::PathManager;
use std::sync::{Once, OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_FILTER: &str = "info,noema_store=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the tracing subscriber. Later calls are no-ops.
pub fn init_logging() {
    INIT.call_once(|| {
        let Some(path) = PathManager::log_file_path() else {
            init_stderr_logging();
            return;
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("[noema] Failed to create log directory {:?}: {}", parent, e);
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path);

        match file {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                // Keeps the background writer alive for the process lifetime
                let _ = LOG_GUARD.set(guard);

                let subscriber = tracing_subscriber::registry().with(env_filter()).with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                );

                match tracing::subscriber::set_global_default(subscriber) {
                    Ok(()) => tracing::info!("Logging initialized, writing to {:?}", path),
                    Err(e) => eprintln!("[noema] Failed to set tracing subscriber: {}", e),
                }
            }
            Err(e) => {
                eprintln!("[noema] Failed to open log file {:?}: {}", path, e);
                init_stderr_logging();
            }
        }
    });
}

fn init_stderr_logging() {
    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}
