//! Errors surfaced by the runtime
//!
//! Relay and event failures never show up here; they become relay status
//! entries and status messages. Only caller misuse and local I/O remain.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("No followees loaded; nothing to analyze")]
    NotReady,

    #[error("Analysis already running")]
    AlreadyAnalyzing,

    #[error("Profile cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("Profile cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),
}
