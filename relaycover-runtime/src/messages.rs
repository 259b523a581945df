//! Status messages, the narrative channel to whoever drives the analysis

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    Idle,
    InvalidPubkey,
    LoadingRelays,
    LoadingFollowees,
    NoFollowees,
    FoundFollowees { count: usize },
    Analyzing { current: usize, total: usize },
    AnalysisComplete { count: usize, total: usize },
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMessage::Idle => write!(f, "Enter a pubkey to begin"),
            StatusMessage::InvalidPubkey => write!(f, "Invalid pubkey"),
            StatusMessage::LoadingRelays => write!(f, "Loading relay list..."),
            StatusMessage::LoadingFollowees => write!(f, "Loading followees..."),
            StatusMessage::NoFollowees => write!(f, "No followees found"),
            StatusMessage::FoundFollowees { count } => write!(f, "Found {} followees", count),
            StatusMessage::Analyzing { current, total } => {
                write!(f, "Analyzing followees... {}/{}", current, total)
            }
            StatusMessage::AnalysisComplete { count, total } => {
                write!(f, "Analysis complete: {}/{} followees analyzed", count, total)
            }
        }
    }
}
