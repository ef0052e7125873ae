//! Tracing setup for host applications.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name prefix inside the log directory
const LOG_FILE_PREFIX: &str = "tokenwarden.log";

/// Initialize the tracing subscriber.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug). With a
/// `log_dir`, output also goes to a daily-rolling file; keep the returned
/// guard alive until shutdown so buffered lines are flushed.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_returns_guard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let guard = init_tracing(Some(dir.path()));
        assert!(guard.is_some());

        // A second initialization is ignored rather than panicking.
        assert!(init_tracing(None).is_none());
    }
}
