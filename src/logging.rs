//! Process-wide structured logging setup, grounded in the teacher's
//! `LoggingConfig::try_init` (env-filtered `tracing-subscriber` with a
//! configurable local timestamp).

use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to install global logging subscriber: {0}")]
    TryInit(String),
}

/// Timestamp format, target inclusion, and the env var consulted for the
/// level filter. `LOG_LEVEL` defaults to `info` when unset or unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub with_target: bool,
    pub timestamp_format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            with_target: false,
            timestamp_format: "%Y-%m-%dT%H:%M:%S".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn try_init(self) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_target(self.with_target)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .with_env_var("LOG_LEVEL")
                    .from_env_lossy(),
            )
            .with_timer(ChronoLocal::new(self.timestamp_format))
            .try_init()
            .map_err(|e| LoggingError::TryInit(e.to_string()))
    }
}
