//! Error types for the Gatekeeper service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors (unknown or invalid policies, bad config files)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter backend could not complete the operation
    #[error("Counter backend error: {0}")]
    Backend(String),

    /// The counter backend did not answer within the configured bound
    #[error("Counter backend timed out after {0:?}")]
    BackendTimeout(Duration),

    /// Errors from the shared Redis store
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeeperError {
    /// Whether this error came from the counter backend rather than wiring.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            GatekeeperError::Backend(_) | GatekeeperError::BackendTimeout(_) | GatekeeperError::Redis(_)
        )
    }
}

impl From<config::ConfigError> for GatekeeperError {
    fn from(err: config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
