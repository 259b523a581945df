//! relaycover Runtime
//!
//! Drives a coverage run end to end:
//! - Batch scheduling with bounded concurrency
//! - Subscription sessions with timeouts and per-relay status
//! - Profile caching with coalesced writes
//! - The aggregation driver that owns per-run state and cancellation

pub mod driver;
pub mod error;
pub mod fetch;
pub mod messages;
pub mod profile_cache;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod testing;

pub use driver::*;
pub use error::*;
pub use fetch::*;
pub use messages::*;
pub use profile_cache::*;
pub use scheduler::*;
pub use session::*;
