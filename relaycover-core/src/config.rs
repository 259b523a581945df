//! Runtime configuration
//!
//! Every field has a default; a TOML file only needs the keys it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    CoreError, BOOTSTRAP_RELAYS, DEFAULT_BATCH_SIZE, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_LIMIT_EVENTS, DEFAULT_MAX_CONCURRENT_BATCHES, DEFAULT_TIMEOUT_MS,
};

/// Tunables for discovery and analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Per-session relay timeout in milliseconds
    pub timeout_ms: u64,
    /// Events requested per single-best fetch
    pub limit_events: usize,
    /// Identities per followee subscription
    pub batch_size: usize,
    /// Batches in flight at once
    pub max_concurrent_batches: usize,
    /// Transport failures before a relay is excluded
    pub failure_threshold: u32,
    /// WebSocket connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Profile cache write-coalescing interval in milliseconds
    pub profile_flush_interval_ms: u64,
    /// Relays used for the user's own data
    pub bootstrap_relays: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            limit_events: DEFAULT_LIMIT_EVENTS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            connect_timeout_ms: 5000,
            profile_flush_interval_ms: 500,
            bootstrap_relays: BOOTSTRAP_RELAYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CoverageConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_size == 0 {
            return Err(CoreError::Config("batch_size must be at least 1".into()));
        }
        if self.max_concurrent_batches == 0 {
            return Err(CoreError::Config("max_concurrent_batches must be at least 1".into()));
        }
        if self.failure_threshold == 0 {
            return Err(CoreError::Config("failure_threshold must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn profile_flush_interval(&self) -> Duration {
        Duration::from_millis(self.profile_flush_interval_ms)
    }
}
