use cdc_config::Environment;
use std::io::Error;
use std::sync::Once;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, registry};

/// Directory rolling log files are written to in production mode.
const LOG_DIR: &str = "logs";

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Log flusher handle for ensuring logs are written before shutdown.
///
/// Production mode returns a [`WorkerGuard`] that must be kept alive to ensure
/// logs are flushed. Development mode doesn't require flushing.
#[must_use]
pub enum LogFlusher {
    /// Production flusher that ensures logs are written to files.
    Flusher(WorkerGuard),
    /// Development flusher that doesn't require explicit flushing.
    NullFlusher,
}

/// Initializes tracing for the given service.
///
/// In production the subscriber writes JSON lines to a daily-rolling file under
/// `logs/`; in development it writes human-readable output to stdout. The
/// `RUST_LOG` env variable controls filtering, defaulting to `info`.
pub fn init_tracing(service_name: &str) -> Result<LogFlusher, TracingError> {
    // Route `log` records from dependencies through tracing.
    LogTracer::init()?;

    let environment = Environment::load()?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if environment.is_prod() {
        let file_appender = rolling::Builder::new()
            .rotation(rolling::Rotation::DAILY)
            .filename_prefix(service_name)
            .build(LOG_DIR)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(non_blocking));
        set_global_default(subscriber)?;

        Ok(LogFlusher::Flusher(guard))
    } else {
        let subscriber = registry().with(env_filter).with(fmt::layer());
        set_global_default(subscriber)?;

        Ok(LogFlusher::NullFlusher)
    }
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for test environments.
///
/// Call once at the beginning of tests. Set `ENABLE_TRACING=1` to view tracing output:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
            let subscriber = registry()
                .with(env_filter)
                .with(fmt::layer().with_test_writer());
            set_global_default(subscriber).expect("Failed to initialize tracing for tests");
        }
    });
}
