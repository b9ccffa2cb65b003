//! Logging setup for processes embedding the pipeline.
//!
//! Events go to `<log_dir>/sqlgate.log.<date>` as JSON lines, one file per
//! day. Rolled files past the retention period are removed at startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "sqlgate.log";
pub const LOG_RETENTION_DAYS: u64 = 14;

const DEFAULT_FILTER: &str = "sqlgate=info,sqlgate_lib=info,sqlgate_core=info";

/// Result of a log directory sweep
#[derive(Debug, Default)]
pub struct Cleanup {
    pub removed: usize,
    /// Expired files that could not be deleted
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Installs the global subscriber and the panic hook
///
/// `RUST_LOG` overrides the default filter. When a global subscriber is
/// already set it is kept and only the directory sweep happens. Fails only
/// when the log directory cannot be created or read.
pub fn init_tracing(log_dir: &Path) -> io::Result<Cleanup> {
    fs::create_dir_all(log_dir)?;
    let cleanup = cleanup_old_logs(log_dir, LOG_RETENTION_DAYS)?;

    let appender: RollingFileAppender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(appender)
        .json()
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init()
        .is_ok();

    if installed {
        install_panic_hook();
    }
    for (path, e) in &cleanup.failed {
        warn!("Failed to remove expired log file {:?}: {}", path, e);
    }
    info!(
        removed = cleanup.removed,
        "Logging to {:?}",
        log_dir
    );
    Ok(cleanup)
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        tracing::error!(target: "panic", %location, %message, "Pipeline worker panicked");
        previous(panic_info);
    }));
}

/// Rolled files carry the date after the prefix: `sqlgate.log.2026-10-18`
pub fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(LOG_FILE_PREFIX))
        .map(|rest| rest.is_empty() || rest.starts_with('.'))
        .unwrap_or(false)
}

/// Removes rolled log files not modified within `retention_days`
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<Cleanup> {
    let cutoff = Duration::from_secs(retention_days * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut cleanup = Cleanup::default();

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if !is_log_file(&path) {
            continue;
        }
        let expired = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > cutoff);
        if !expired {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => cleanup.removed += 1,
            Err(e) => cleanup.failed.push((path, e)),
        }
    }
    Ok(cleanup)
}
