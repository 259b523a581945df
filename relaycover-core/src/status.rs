//! Per-relay status for one analysis run

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one relay within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Wait,
    Connecting,
    Loading,
    Eose,
    Timeout,
    Error,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Wait => "wait",
            RelayState::Connecting => "connecting",
            RelayState::Loading => "loading",
            RelayState::Eose => "eose",
            RelayState::Timeout => "timeout",
            RelayState::Error => "error",
        }
    }

    /// Apply a transition. `Error` sticks for the rest of the run.
    pub fn transition(self, next: RelayState) -> RelayState {
        if self == RelayState::Error {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relay chip: endpoint and its current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatusEntry {
    pub url: String,
    pub state: RelayState,
}

impl RelayStatusEntry {
    pub fn waiting(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: RelayState::Wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_sticky() {
        let state = RelayState::Loading.transition(RelayState::Error);
        assert_eq!(state.transition(RelayState::Eose), RelayState::Error);
    }

    #[test]
    fn test_latest_transition_wins() {
        let state = RelayState::Wait
            .transition(RelayState::Connecting)
            .transition(RelayState::Loading)
            .transition(RelayState::Timeout);
        assert_eq!(state, RelayState::Timeout);
        assert_eq!(state.to_string(), "timeout");
    }
}
