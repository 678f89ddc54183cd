//! Logging setup
//!
//! Installs a `tracing` subscriber: console output filtered by `RUST_LOG`
//! (or the configured filter), plus an optional daily rolling file written
//! through a non-blocking worker. Keep the returned [`LoggingGuard`] alive
//! for as long as logs should be flushed to the file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LogConfig;
use crate::core::{RuntimeError, RuntimeResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flushes the file writer when dropped
#[must_use = "dropping the guard stops writing the log file"]
#[derive(Debug, Default)]
pub struct LoggingGuard {
    file: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether a log file is being written
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// Console logging with the default configuration
pub fn init_logging() -> RuntimeResult<LoggingGuard> {
    init_logging_with(&LogConfig::default())
}

/// Install the global subscriber described by `config`.
///
/// A second install keeps the first subscriber and is not an error.
pub fn init_logging_with(config: &LogConfig) -> RuntimeResult<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| {
            RuntimeError::config(format!("invalid log filter '{}': {}", config.filter, err))
        })?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    });

    let mut guard = LoggingGuard::default();
    if let Some(directory) = &config.directory {
        std::fs::create_dir_all(directory).map_err(|err| {
            RuntimeError::config(format!(
                "cannot create log directory {}: {}",
                directory.display(),
                err
            ))
        })?;
        let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(if config.json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
        guard.file = Some(worker);
    }

    match tracing_subscriber::registry().with(layers).with(filter).try_init() {
        Ok(()) => tracing::debug!("[Logging] Subscriber installed"),
        Err(_) => tracing::debug!("[Logging] Subscriber already installed, keeping it"),
    }
    Ok(guard)
}
