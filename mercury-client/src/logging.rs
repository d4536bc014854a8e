//! Logging setup for applications embedding the client
//!
//! The client itself only emits `tracing` events. Applications that do not
//! install their own subscriber can use [`init_logging`] or
//! [`init_logging_from_env`] to get one.

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable selecting the logging mode
pub const LOG_MODE_ENV: &str = "MERCURY_LOG_MODE";

/// Environment variable overriding the log filter
pub const LOG_LEVEL_ENV: &str = "MERCURY_LOG_LEVEL";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Verbose output with source locations at `debug`
    Debug,
}

impl LoggingMode {
    fn default_level(self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Development => "info",
            Self::Debug => "debug",
        }
    }
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Ok(Self::Silent),
            "development" | "dev" => Ok(Self::Development),
            "debug" => Ok(Self::Debug),
            other => Err(LoggingError::InvalidEnv(format!(
                "{LOG_MODE_ENV}={other} (expected silent, development or debug)"
            ))),
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// # Examples
///
/// ```rust,ignore
/// use mercury_client::logging::{init_logging, LoggingMode};
///
/// init_logging(LoggingMode::Development)?;
/// ```
///
/// # Environment Variables
///
/// - `MERCURY_LOG_LEVEL`: filter directive, e.g. `mercury_client=trace`
/// - `RUST_LOG`: used when `MERCURY_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter(mode.default_level())?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter(mode.default_level())?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `MERCURY_LOG_MODE`.
///
/// Unset means [`LoggingMode::Silent`]; an unrecognized value is an error.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LoggingMode::Silent,
    };

    init_logging(mode)
}

/// Build the filter from `MERCURY_LOG_LEVEL`, then `RUST_LOG`, then `default_level`
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let (source, directives) = if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
        (LOG_LEVEL_ENV, level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        ("RUST_LOG", rust_log)
    } else {
        return Ok(EnvFilter::new(default_level));
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidEnv(format!("{source}={directives}: {e}")))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

/// Equivalent to `init_logging(LoggingMode::Silent)`
pub fn init_silent() -> Result<(), LoggingError> {
    init_logging(LoggingMode::Silent)
}
