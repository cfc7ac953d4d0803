//! Usage: Logging setup - console plus a rolling file under the app dot-dir,
//! so the web UI can read the same log the terminal shows.

use crate::infra::credentials::dotdir;
use crate::shared::error::AppResult;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "app.log";

static INSTALLED_DIR: OnceLock<PathBuf> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber: console layer + daily-rolling file layer at
/// `<dot-dir>/logs/app.log.*`, filtered via `RUST_LOG` (default `info`).
/// Idempotent - repeat calls return the already-installed log directory.
pub fn init_file_logging() -> AppResult<PathBuf> {
    if let Some(dir) = INSTALLED_DIR.get() {
        return Ok(dir.clone());
    }

    let log_dir = dotdir().join(LOG_DIR);
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        );

    // Route `log`-based records from dependencies through tracing too.
    let _ = tracing_log::LogTracer::init();

    match subscriber.try_init() {
        Ok(()) => {
            let _ = FILE_GUARD.set(guard);
        }
        Err(err) => {
            // A subscriber is already installed (embedding host or tests own
            // logging); keep theirs and skip the file layer.
            tracing::warn!("file logging not installed: {}", err);
        }
    }

    let _ = INSTALLED_DIR.set(log_dir.clone());
    Ok(log_dir)
}
