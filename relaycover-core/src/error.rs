//! Error types for the core crate

use thiserror::Error;

/// Result type alias using the core error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors from parsing and configuration
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
