use std::path::Path;

use pyserve_shared::errors::{ServiceError, ServiceResult};
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Keeps the background log writer alive; logs are flushed when dropped.
pub use tracing_appender::non_blocking::WorkerGuard as FileLogGuard;

/// Separator of module search path entries on this platform.
#[cfg(windows)]
pub const SEARCH_PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const SEARCH_PATH_SEPARATOR: char = ':';

/// Append `dir` to a module search path value.
///
/// An absent or empty `existing` yields `dir` alone, so the worker never
/// sees a leading separator (which Python reads as the current directory).
pub fn extend_search_path(existing: Option<&str>, dir: &Path) -> String {
    match existing.filter(|e| !e.is_empty()) {
        Some(existing) => format!("{}{}{}", existing, SEARCH_PATH_SEPARATOR, dir.display()),
        None => dir.display().to_string(),
    }
}

/// Initialize tracing with file logging.
///
/// Logs are written to `{dir}/pyserve.log` with daily rotation. The filter
/// comes from `RUST_LOG` and defaults to `info`. Returns the guard
/// that must be kept alive to maintain the background writer thread.
pub fn init_file_logging(dir: &Path) -> ServiceResult<FileLogGuard> {
    std::fs::create_dir_all(dir).map_err(|e| {
        ServiceError::Storage(format!(
            "Failed to create logs directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(dir, "pyserve.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    register_to_tracing(non_blocking, env_filter);
    Ok(guard)
}

/// Install a global subscriber writing to `non_blocking`.
///
/// A no-op when the host already installed a subscriber.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
