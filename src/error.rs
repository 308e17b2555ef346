//! Error types for the Tollgate engine.

use thiserror::Error;

use crate::ratelimit::Decision;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A strategy was called with, or constructed from, unusable parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration-file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request was denied by an enforcing caller
    #[error("Rate limit exceeded ({}), retry after {:.3}s",
        .0.limit_type(),
        .0.retry_after().map(|d| d.as_secs_f64()).unwrap_or_default())]
    RateLimited(Decision),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        TollgateError::InvalidConfiguration(message.into())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
