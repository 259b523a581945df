//! Relay list sources and their precedence
//!
//! A followee can advertise relays two ways: a directory-format relay list
//! (kind 10002) or the legacy relay map inside the contact list (kind 3).
//! The directory list wins whenever one has been seen.

use serde::{Deserialize, Serialize};

use crate::{kind, parse_legacy_relay_list, parse_relay_list, write_relays, Event, RelayDescriptor};

/// Which relay list formats an analysis run may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFlags {
    pub use_directory_format: bool,
    pub use_legacy_format: bool,
}

impl Default for SourceFlags {
    fn default() -> Self {
        Self {
            use_directory_format: true,
            use_legacy_format: true,
        }
    }
}

impl SourceFlags {
    /// Event kinds to request for the enabled formats
    pub fn kinds(&self) -> Vec<u32> {
        let mut kinds = Vec::new();
        if self.use_directory_format {
            kinds.push(kind::RELAY_LIST);
        }
        if self.use_legacy_format {
            kinds.push(kind::CONTACT_LIST);
        }
        kinds
    }

    pub fn any(&self) -> bool {
        self.use_directory_format || self.use_legacy_format
    }
}

/// The relay list chosen for one followee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaySource {
    Directory(Event),
    Legacy(Event),
    None,
}

impl RelaySource {
    /// Pick the source for a followee given the newest event of each format.
    ///
    /// A legacy event only counts when its content actually lists relays.
    pub fn select(directory: Option<&Event>, legacy: Option<&Event>, flags: SourceFlags) -> Self {
        if flags.use_directory_format {
            if let Some(event) = directory {
                return RelaySource::Directory(event.clone());
            }
        }
        if flags.use_legacy_format {
            if let Some(event) = legacy {
                if !parse_legacy_relay_list(event).is_empty() {
                    return RelaySource::Legacy(event.clone());
                }
            }
        }
        RelaySource::None
    }

    pub fn descriptors(&self) -> Vec<RelayDescriptor> {
        match self {
            RelaySource::Directory(event) => parse_relay_list(event),
            RelaySource::Legacy(event) => parse_legacy_relay_list(event),
            RelaySource::None => Vec::new(),
        }
    }

    /// Write relays of the chosen list, or `None` when there is no list
    pub fn write_relays(&self) -> Option<Vec<String>> {
        match self {
            RelaySource::None => None,
            source => Some(write_relays(&source.descriptors())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelaySource::Directory(_) => "directory",
            RelaySource::Legacy(_) => "legacy",
            RelaySource::None => "none",
        }
    }
}
