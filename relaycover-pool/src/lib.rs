//! relaycover Relay Pool
//!
//! Provides the relay transport behind coverage analysis:
//! - NIP-01 message encoding and decoding
//! - One multiplexed WebSocket connection per relay
//! - Queries scoped to an explicit endpoint set, streamed back as messages

pub mod connection;
pub mod message;
pub mod pool;

pub use connection::{ConnectionState, ConnectionStateChange, PoolConfig, PoolError};
pub use message::*;
pub use pool::*;
