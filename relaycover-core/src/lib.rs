//! relaycover Core - domain model and pure analysis for relay coverage
//!
//! This crate provides the foundational primitives:
//! - Identities and relay URL normalization
//! - Nostr events, filters and the parsers for relay lists, contact lists and profiles
//! - The coverage analyzer and ranking rule
//! - Per-(identity, kind) event deduplication
//! - Relay health tracking
//! - Runtime configuration

pub mod config;
pub mod coverage;
pub mod dedup;
pub mod error;
pub mod event;
pub mod health;
pub mod identity;
pub mod parse;
pub mod profile;
pub mod relay_url;
pub mod source;
pub mod status;

pub use config::*;
pub use coverage::*;
pub use dedup::*;
pub use error::*;
pub use event::*;
pub use health::*;
pub use identity::*;
pub use parse::*;
pub use profile::*;
pub use relay_url::*;
pub use source::*;
pub use status::*;

/// Relay fetch timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 7000;

/// Maximum events requested per single-best fetch
pub const DEFAULT_LIMIT_EVENTS: usize = 3;

/// Identities per followee subscription
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Batches allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;

/// Transport failures before a relay is excluded
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Relays used to discover a user's own relay list, profile and contacts
pub const BOOTSTRAP_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://directory.yabu.me",
    "wss://yabu.me",
    "wss://purplepag.es",
    "wss://indexer.coracle.social",
    "wss://temp.iris.to",
    "wss://relay.snort.social",
    "wss://relay.nostr.band",
    "wss://nos.lol",
    "wss://nostr.wine",
];
