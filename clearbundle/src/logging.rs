//! Logging bootstrap for front-ends.
//!
//! Diagnostic output goes through `tracing`: stderr gets warnings and
//! errors so command output on stdout stays clean, while the optional log
//! file captures everything the `RUST_LOG` filter allows.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Keeps the non-blocking log writer alive.
///
/// Dropping the guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// With a log directory, a full-detail file layer writes to
/// `<dir>/clearbundle.log`; stderr always carries warnings and errors.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_dir: Option<&Path>) -> Result<LoggingGuard, io::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::never(dir, "clearbundle.log");
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(LevelFilter::WARN);

            // a second init in the same process keeps the first subscriber
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(stderr_layer)
                .try_init();
            Ok(LoggingGuard {
                _file_guard: Some(file_guard),
            })
        }
        None => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(LevelFilter::WARN);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();
            Ok(LoggingGuard { _file_guard: None })
        }
    }
}
