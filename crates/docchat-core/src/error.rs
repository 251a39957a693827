//! Error types for docchat-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
