//! Canonical participant identities
//!
//! An identity is always the 64-character lowercase hex form of a public key.
//! Encoded forms (`npub1...`) are decoded at the edge and never compared.

use std::fmt;
use std::str::FromStr;

use nostr::nips::nip19::FromBech32;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Length of a hex-encoded public key
pub const IDENTITY_HEX_LEN: usize = 64;

/// A canonical hex public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Parse a 64-char hex key (any case). Surrounding whitespace is ignored.
    pub fn from_hex(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        if trimmed.len() != IDENTITY_HEX_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidIdentity(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex chars, for log lines
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

/// Decode user input into an identity.
///
/// Accepts the canonical hex form or a bech32 `npub`. Returns `None` for
/// anything else; never panics.
pub fn decode_identity(input: &str) -> Option<Identity> {
    let trimmed = input.trim();
    if trimmed.starts_with("npub1") {
        return nostr::PublicKey::from_bech32(trimmed)
            .ok()
            .and_then(|pk| Identity::from_hex(&pk.to_hex()).ok());
    }
    Identity::from_hex(trimmed).ok()
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_identity(s).ok_or_else(|| CoreError::InvalidIdentity(s.to_string()))
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Identity::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";

    #[test]
    fn test_hex_identity() {
        assert_eq!(decode_identity(HEX).unwrap().as_str(), HEX);
    }

    #[test]
    fn test_uppercase_hex_is_lowered() {
        let upper = HEX.to_uppercase();
        assert_eq!(decode_identity(&upper).unwrap().as_str(), HEX);
    }

    #[test]
    fn test_whitespace_trimmed() {
        let padded = format!("  {}  ", HEX);
        assert_eq!(decode_identity(&padded).unwrap().as_str(), HEX);
    }

    #[test]
    fn test_npub_decodes_to_hex() {
        let npub = "npub1sg6plzptd64u62a878hep2kev88swjh3tw00gjsfl8f237lmu63q0uf63m";
        let id = decode_identity(npub).unwrap();
        assert_eq!(id.as_str().len(), IDENTITY_HEX_LEN);
        assert!(id.as_str().chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_invalid_input() {
        assert!(decode_identity("invalid").is_none());
        assert!(decode_identity("tooshort").is_none());
        assert!(decode_identity("").is_none());
        assert!(decode_identity("npub1notreallybech32").is_none());
        // right length, wrong alphabet
        let bad = "g".repeat(IDENTITY_HEX_LEN);
        assert!(decode_identity(&bad).is_none());
    }

    #[test]
    fn test_serde_roundtrip_rejects_bad_hex() {
        let json = format!("\"{}\"", HEX);
        let id: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(id.short(), "abcdef01");
        assert!(serde_json::from_str::<Identity>("\"xyz\"").is_err());
    }
}
