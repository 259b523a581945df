//! Parsers for the event kinds the analyzer consumes
//!
//! Every parser is total: malformed content yields an empty result for that
//! one event and a debug log line, never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{is_acceptable_relay_url, Event, Identity, Profile};

/// A relay entry from a relay list with its direction markers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub url: String,
    pub read: bool,
    pub write: bool,
}

impl RelayDescriptor {
    pub fn new(url: impl Into<String>, read: bool, write: bool) -> Self {
        Self {
            url: url.into(),
            read,
            write,
        }
    }
}

/// Parse `r` tags of a directory-format relay list.
///
/// No marker means read and write; `read` or `write` restricts to one side.
pub fn parse_relay_list(event: &Event) -> Vec<RelayDescriptor> {
    event
        .tags_named("r")
        .filter_map(|tag| {
            let url = tag.get(1).filter(|u| !u.is_empty())?;
            if !is_acceptable_relay_url(url) {
                debug!("Skipping non-public relay {}", url);
                return None;
            }
            let (read, write) = match tag.get(2).map(String::as_str) {
                Some("read") => (true, false),
                Some("write") => (false, true),
                _ => (true, true),
            };
            Some(RelayDescriptor::new(url.clone(), read, write))
        })
        .collect()
}

/// Parse the legacy relay map embedded as JSON in a contact list's content.
///
/// Shape: `{"wss://relay": {"read": bool, "write": bool}}`. A missing flag
/// counts as enabled.
pub fn parse_legacy_relay_list(event: &Event) -> Vec<RelayDescriptor> {
    if event.content.trim().is_empty() {
        return Vec::new();
    }
    let map = match serde_json::from_str::<Value>(&event.content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Vec::new(),
        Err(e) => {
            debug!("Legacy relay list from {} is not JSON: {}", event.author.short(), e);
            return Vec::new();
        }
    };

    map.into_iter()
        .filter(|(url, _)| is_acceptable_relay_url(url))
        .map(|(url, flags)| {
            let flag = |name: &str| flags.get(name).and_then(Value::as_bool).unwrap_or(true);
            RelayDescriptor::new(url, flag("read"), flag("write"))
        })
        .collect()
}

/// Followed identities from `p` tags, in order.
///
/// Entries that are not valid hex keys are skipped; repeats keep their first
/// position.
pub fn parse_contact_list(event: &Event) -> Vec<Identity> {
    let mut seen = std::collections::HashSet::new();
    event
        .tags_named("p")
        .filter_map(|tag| tag.get(1))
        .filter_map(|raw| Identity::from_hex(raw).ok())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Profile fields from a metadata event's JSON content.
pub fn parse_profile(event: &Event) -> Profile {
    let mut profile = Profile::empty(event.author.clone());
    let content = match serde_json::from_str::<Value>(&event.content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return profile,
        Err(e) => {
            debug!("Profile of {} is not JSON: {}", event.author.short(), e);
            return profile;
        }
    };

    let field = |name: &str| content.get(name).and_then(Value::as_str).map(str::to_string);
    profile.name = field("name");
    profile.display_name = field("display_name");
    profile.picture = field("picture");
    profile.nip05 = field("nip05");
    profile
}

/// URLs of relays marked for reading
pub fn read_relays(relays: &[RelayDescriptor]) -> Vec<String> {
    relays.iter().filter(|r| r.read).map(|r| r.url.clone()).collect()
}

/// URLs of relays marked for writing
pub fn write_relays(relays: &[RelayDescriptor]) -> Vec<String> {
    relays.iter().filter(|r| r.write).map(|r| r.url.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind;

    fn author() -> Identity {
        Identity::from_hex(&"b".repeat(64)).unwrap()
    }

    #[test]
    fn test_parse_relay_list_markers() {
        let event = Event::new(author(), kind::RELAY_LIST, 0)
            .with_tag(["r", "wss://relay.damus.io"])
            .with_tag(["r", "wss://yabu.me", "read"])
            .with_tag(["r", "wss://nos.lol", "write"]);

        let relays = parse_relay_list(&event);

        assert_eq!(
            relays,
            vec![
                RelayDescriptor::new("wss://relay.damus.io", true, true),
                RelayDescriptor::new("wss://yabu.me", true, false),
                RelayDescriptor::new("wss://nos.lol", false, true),
            ]
        );
        assert_eq!(read_relays(&relays), vec!["wss://relay.damus.io", "wss://yabu.me"]);
        assert_eq!(write_relays(&relays), vec!["wss://relay.damus.io", "wss://nos.lol"]);
    }

    #[test]
    fn test_parse_relay_list_ignores_other_tags_and_local_hosts() {
        let event = Event::new(author(), kind::RELAY_LIST, 0)
            .with_tag(["p", "somepubkey"])
            .with_tag(["r", "wss://relay.damus.io"])
            .with_tag(["r", "ws://localhost:4869"])
            .with_tag(["r"])
            .with_tag(["e", "someeventid"]);

        assert_eq!(parse_relay_list(&event).len(), 1);
    }

    #[test]
    fn test_parse_contact_list() {
        let a = "1".repeat(64);
        let b = "2".repeat(64);
        let event = Event::new(author(), kind::CONTACT_LIST, 0)
            .with_tag(["p", a.as_str()])
            .with_tag(["e", "eventid"])
            .with_tag(["p", "not-a-key"])
            .with_tag(["p", b.as_str(), "wss://hint"])
            .with_tag(["p", a.as_str()]);

        let ids: Vec<_> = parse_contact_list(&event).into_iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_parse_profile() {
        let event = Event::new(author(), kind::METADATA, 0).with_content(
            r#"{"name":"testuser","display_name":"Test User","picture":"https://example.com/pic.jpg","nip05":"test@example.com"}"#,
        );

        let profile = parse_profile(&event);

        assert_eq!(profile.name.as_deref(), Some("testuser"));
        assert_eq!(profile.display_name.as_deref(), Some("Test User"));
        assert_eq!(profile.picture.as_deref(), Some("https://example.com/pic.jpg"));
        assert_eq!(profile.nip05.as_deref(), Some("test@example.com"));
    }

    #[test]
    fn test_parse_profile_invalid_json() {
        let event = Event::new(author(), kind::METADATA, 0).with_content("not json");
        assert_eq!(parse_profile(&event), Profile::empty(author()));
    }

    #[test]
    fn test_parse_legacy_relay_list() {
        let event = Event::new(author(), kind::CONTACT_LIST, 0).with_content(
            r#"{"wss://nos.lol":{"read":true,"write":false},"wss://relay.damus.io":{"write":true},"ws://127.0.0.1":{}}"#,
        );

        let mut relays = parse_legacy_relay_list(&event);
        relays.sort_by(|a, b| a.url.cmp(&b.url));

        assert_eq!(
            relays,
            vec![
                RelayDescriptor::new("wss://nos.lol", true, false),
                RelayDescriptor::new("wss://relay.damus.io", true, true),
            ]
        );
    }

    #[test]
    fn test_parse_legacy_relay_list_keeps_content_order() {
        let event = Event::new(author(), kind::CONTACT_LIST, 0)
            .with_content(r#"{"wss://z.example":{},"wss://a.example":{},"wss://m.example":{}}"#);
        let urls: Vec<String> = parse_legacy_relay_list(&event)
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(urls, vec!["wss://z.example", "wss://a.example", "wss://m.example"]);
    }

    #[test]
    fn test_parse_legacy_relay_list_malformed() {
        for content in ["", "garbage", "[1,2]", "\"str\""] {
            let event = Event::new(author(), kind::CONTACT_LIST, 0).with_content(content);
            assert!(parse_legacy_relay_list(&event).is_empty());
        }
    }
}
