//! Nostr events and query filters
//!
//! Events are untrusted payloads: signatures are carried but never checked.
//! Only `kind`, `tags`, `content`, `created_at` and the author are consumed.

use serde::{Deserialize, Serialize};

use crate::Identity;

/// Event kinds consumed by the analyzer
pub mod kind {
    /// Profile metadata (JSON content)
    pub const METADATA: u32 = 0;
    /// Contact list (`p` tags, legacy relay map in content)
    pub const CONTACT_LIST: u32 = 3;
    /// Relay list (`r` tags with optional read/write marker)
    pub const RELAY_LIST: u32 = 10002;
}

/// A signed nostr event as delivered by a relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "pubkey")]
    pub author: Identity,
    pub created_at: u64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Unsigned event with a synthetic id, for fixtures and scripted pools
    pub fn new(author: Identity, kind: u32, created_at: u64) -> Self {
        Self {
            id: format!("{}-{}-{}", author.short(), kind, created_at),
            author,
            created_at,
            kind,
            tags: Vec::new(),
            content: String::new(),
            sig: String::new(),
        }
    }

    pub fn with_tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Tags whose first element equals `name`
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
    }
}

/// A relay subscription filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = Identity>) -> Self {
        self.authors = authors.into_iter().collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event satisfies the kind and author constraints
    pub fn matches(&self, event: &Event) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && (self.authors.is_empty() || self.authors.contains(&event.author))
    }
}
