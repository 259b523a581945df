//! Followee and user profiles (kind 0 metadata)

use serde::{Deserialize, Serialize};

use crate::Identity;

/// Display metadata for an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "pubkey")]
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
}

impl Profile {
    /// Profile carrying only the identity
    pub fn empty(identity: Identity) -> Self {
        Self {
            identity,
            name: None,
            display_name: None,
            picture: None,
            nip05: None,
        }
    }

    /// True when nothing worth showing is known
    pub fn is_missing(&self) -> bool {
        self.name.is_none() && self.display_name.is_none() && self.picture.is_none()
    }

    /// Replace with `newer` unless it carries nothing and this one does.
    pub fn superseded_by(self, newer: Profile) -> Profile {
        if newer.is_missing() && newer.nip05.is_none() && !self.is_missing() {
            self
        } else {
            newer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Identity {
        Identity::from_hex(&"a".repeat(64)).unwrap()
    }

    #[test]
    fn test_empty_profile_is_missing() {
        assert!(Profile::empty(id()).is_missing());
    }

    #[test]
    fn test_populated_profile_survives_empty_replacement() {
        let known = Profile {
            name: Some("alice".into()),
            ..Profile::empty(id())
        };
        let merged = known.clone().superseded_by(Profile::empty(id()));
        assert_eq!(merged, known);
    }

    #[test]
    fn test_newer_profile_replaces() {
        let old = Profile {
            name: Some("alice".into()),
            ..Profile::empty(id())
        };
        let newer = Profile {
            display_name: Some("Alice".into()),
            ..Profile::empty(id())
        };
        let merged = old.superseded_by(newer.clone());
        assert_eq!(merged, newer);
        assert!(merged.name.is_none());
    }
}
