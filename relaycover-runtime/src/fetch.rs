//! Single-best fetch: the newest event of one kind by one author

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use relaycover_core::{CoverageConfig, Event, Identity, LatestEventTracker, RelayHealth};
use relaycover_pool::RelayPool;

use crate::session::{SessionRequest, SubscriptionSession};

#[derive(Clone)]
pub struct Fetcher {
    pool: Arc<dyn RelayPool>,
    health: Arc<RelayHealth>,
    timeout: Duration,
    limit: usize,
}

impl Fetcher {
    pub fn new(pool: Arc<dyn RelayPool>, health: Arc<RelayHealth>, config: &CoverageConfig) -> Self {
        Self {
            pool,
            health,
            timeout: config.timeout(),
            limit: config.limit_events,
        }
    }

    /// Newest `kind` event by `author` across `endpoints`, or `None` when no
    /// relay had one before the timeout.
    pub async fn latest(
        &self,
        author: &Identity,
        kind: u32,
        endpoints: &[String],
        cancel: &CancellationToken,
    ) -> Option<Event> {
        let tracker = Arc::new(Mutex::new(LatestEventTracker::new()));
        let session = SubscriptionSession::new(self.pool.clone(), self.health.clone(), tracker.clone());
        let request = SessionRequest {
            authors: vec![author.clone()],
            kinds: vec![kind],
            endpoints: endpoints.to_vec(),
            limit: Some(self.limit),
            timeout: self.timeout,
        };
        session.run(request, cancel, |_| {}).await;

        let best = tracker.lock().latest(author, kind).cloned();
        best
    }
}
