//! Relay health tracking
//!
//! Counts transport failures per normalized relay URL. A relay that reaches
//! the threshold is excluded for the rest of the process unless `reset` is
//! called. There is no half-open retry.
//!
//! One dead connection is usually seen by every query multiplexed over it,
//! so failures reported with a connection id count once per connection.

use dashmap::{DashMap, DashSet};
use tracing::warn;

use crate::{normalize_relay_url, DEFAULT_FAILURE_THRESHOLD};

/// Shared failure counters, safe to use from concurrent sessions
#[derive(Debug)]
pub struct RelayHealth {
    failures: DashMap<String, u32>,
    counted: DashSet<(String, u64)>,
    threshold: u32,
}

impl RelayHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: DashMap::new(),
            counted: DashSet::new(),
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count one transport failure against `endpoint`.
    pub fn record_failure(&self, endpoint: &str) {
        let key = normalize_relay_url(endpoint);
        let mut count = self.failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        if *count == self.threshold {
            warn!("Relay {} excluded after {} failures", key, *count);
        }
    }

    /// Count the failure of connection `connection` to `endpoint`, once no
    /// matter how many subscriptions report it. Returns whether it counted.
    pub fn record_connection_failure(&self, endpoint: &str, connection: u64) -> bool {
        if !self.counted.insert((normalize_relay_url(endpoint), connection)) {
            return false;
        }
        self.record_failure(endpoint);
        true
    }

    pub fn failures(&self, endpoint: &str) -> u32 {
        self.failures
            .get(&normalize_relay_url(endpoint))
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn is_healthy(&self, endpoint: &str) -> bool {
        self.failures(endpoint) < self.threshold
    }

    /// Endpoints still under the failure threshold, in input order
    pub fn filter_healthy<S: AsRef<str>>(&self, endpoints: &[S]) -> Vec<String> {
        endpoints
            .iter()
            .map(AsRef::as_ref)
            .filter(|e| self.is_healthy(e))
            .map(str::to_string)
            .collect()
    }

    /// Clear every counter
    pub fn reset(&self) {
        self.failures.clear();
        self.counted.clear();
    }
}

impl Default for RelayHealth {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}
