//! Subscription Session
//!
//! One bounded query over a batch of authors: health-filtered endpoints,
//! per-relay state tracking, a hard timeout, and latest-event dedup shared
//! with the rest of the run. Improvements are streamed out as they arrive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use relaycover_core::{
    dedup_relay_urls, normalize_relay_url, Event, Filter, Identity, LatestEventTracker,
    RelayHealth, RelayState,
};
use relaycover_pool::{PoolMessage, QueryMode, RelayPool};

/// What to ask for and where
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub authors: Vec<Identity>,
    pub kinds: Vec<u32>,
    pub endpoints: Vec<String>,
    pub limit: Option<usize>,
    pub timeout: Duration,
}

/// Incremental output of a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RelayState { relay: String, state: RelayState },
    /// Strictly newer than anything seen for this author and kind in the run
    NewBest { relay: String, event: Event },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    TimedOut,
    Cancelled,
}

/// Returned exactly once per session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub endpoints: usize,
    pub eose: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub new_best: usize,
}

impl SessionOutcome {
    fn new(endpoints: usize) -> Self {
        Self {
            end: SessionEnd::Completed,
            endpoints,
            eose: 0,
            errors: 0,
            timeouts: 0,
            new_best: 0,
        }
    }
}

struct Tracked {
    url: String,
    state: RelayState,
    done: bool,
}

#[derive(Clone)]
pub struct SubscriptionSession {
    pool: Arc<dyn RelayPool>,
    health: Arc<RelayHealth>,
    tracker: Arc<Mutex<LatestEventTracker>>,
}

impl SubscriptionSession {
    pub fn new(
        pool: Arc<dyn RelayPool>,
        health: Arc<RelayHealth>,
        tracker: Arc<Mutex<LatestEventTracker>>,
    ) -> Self {
        Self {
            pool,
            health,
            tracker,
        }
    }

    /// Run one session to completion, timeout, or cancellation.
    ///
    /// Nothing is emitted once `cancel` has fired.
    pub async fn run<E>(
        &self,
        request: SessionRequest,
        cancel: &CancellationToken,
        mut emit: E,
    ) -> SessionOutcome
    where
        E: FnMut(SessionEvent),
    {
        let endpoints = self
            .health
            .filter_healthy(&dedup_relay_urls(&request.endpoints));
        let mut outcome = SessionOutcome::new(endpoints.len());

        if cancel.is_cancelled() {
            outcome.end = SessionEnd::Cancelled;
            return outcome;
        }
        if endpoints.is_empty() || request.authors.is_empty() || request.kinds.is_empty() {
            trace!("Nothing to query; session completes immediately");
            return outcome;
        }

        let mut send = |event: SessionEvent| {
            if !cancel.is_cancelled() {
                emit(event);
            }
        };

        let mut relays: HashMap<String, Tracked> = HashMap::new();
        for url in &endpoints {
            relays.insert(
                normalize_relay_url(url),
                Tracked {
                    url: url.clone(),
                    state: RelayState::Connecting,
                    done: false,
                },
            );
            send(SessionEvent::RelayState {
                relay: url.clone(),
                state: RelayState::Connecting,
            });
        }

        let mut filter = Filter::new()
            .kinds(request.kinds.iter().copied())
            .authors(request.authors.iter().cloned());
        if let Some(limit) = request.limit {
            filter = filter.limit(limit);
        }

        let mut handle = self
            .pool
            .query(&endpoints, filter.clone(), QueryMode::Backward)
            .await;
        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = &mut deadline => {
                    for relay in relays.values_mut().filter(|r| !r.done) {
                        relay.done = true;
                        relay.state = relay.state.transition(RelayState::Timeout);
                        outcome.timeouts += 1;
                        send(SessionEvent::RelayState {
                            relay: relay.url.clone(),
                            state: RelayState::Timeout,
                        });
                    }
                    break SessionEnd::TimedOut;
                }
                message = handle.next() => match message {
                    None | Some(PoolMessage::Complete) => {
                        // the pool is done; anything it never reported on failed
                        for relay in relays.values_mut().filter(|r| !r.done) {
                            debug!("Relay {} ended without EOSE", relay.url);
                            relay.done = true;
                            relay.state = RelayState::Error;
                            outcome.errors += 1;
                            send(SessionEvent::RelayState {
                                relay: relay.url.clone(),
                                state: RelayState::Error,
                            });
                        }
                        break SessionEnd::Completed;
                    }
                    Some(PoolMessage::Event { relay, event }) => {
                        let Some(tracked) = relays.get_mut(&normalize_relay_url(&relay)) else {
                            continue;
                        };
                        if tracked.state == RelayState::Connecting {
                            tracked.state = RelayState::Loading;
                            send(SessionEvent::RelayState {
                                relay: tracked.url.clone(),
                                state: RelayState::Loading,
                            });
                        }
                        if !filter.matches(&event) {
                            trace!("Discarding off-filter event {} from {}", event.id, relay);
                            continue;
                        }
                        let fresh = self.tracker.lock().offer(&event);
                        if fresh {
                            outcome.new_best += 1;
                            send(SessionEvent::NewBest { relay, event });
                        }
                    }
                    Some(PoolMessage::Eose { relay }) => {
                        if let Some(tracked) = relays.get_mut(&normalize_relay_url(&relay)) {
                            if !tracked.done {
                                tracked.done = true;
                                tracked.state = tracked.state.transition(RelayState::Eose);
                                outcome.eose += 1;
                                send(SessionEvent::RelayState {
                                    relay: tracked.url.clone(),
                                    state: RelayState::Eose,
                                });
                            }
                        }
                    }
                    Some(PoolMessage::Error { relay, reason, connection }) => {
                        if let Some(tracked) = relays.get_mut(&normalize_relay_url(&relay)) {
                            if !tracked.done {
                                debug!("Relay {} failed: {}", tracked.url, reason);
                                tracked.done = true;
                                tracked.state = RelayState::Error;
                                outcome.errors += 1;
                                if let Some(connection) = connection {
                                    self.health.record_connection_failure(&tracked.url, connection);
                                }
                                send(SessionEvent::RelayState {
                                    relay: tracked.url.clone(),
                                    state: RelayState::Error,
                                });
                            }
                        }
                    }
                }
            }

            if relays.values().all(|r| r.done) {
                break SessionEnd::Completed;
            }
        };
        outcome.end = end;

        handle.close();
        debug!(
            "Session over {} relays ended {:?}: {} eose, {} errors, {} timeouts, {} new",
            outcome.endpoints,
            outcome.end,
            outcome.eose,
            outcome.errors,
            outcome.timeouts,
            outcome.new_best
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RelayScript, ScriptedPool};
    use relaycover_core::kind;

    fn id(c: char) -> Identity {
        Identity::from_hex(&c.to_string().repeat(64)).unwrap()
    }

    fn session(pool: ScriptedPool, health: Arc<RelayHealth>) -> SubscriptionSession {
        SubscriptionSession::new(
            Arc::new(pool),
            health,
            Arc::new(Mutex::new(LatestEventTracker::new())),
        )
    }

    fn request(endpoints: &[&str], timeout_ms: u64) -> SessionRequest {
        SessionRequest {
            authors: vec![id('a')],
            kinds: vec![kind::RELAY_LIST],
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            limit: None,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn test_newest_event_wins_across_relays() {
        let pool = ScriptedPool::new()
            .relay(
                "wss://one.test",
                RelayScript::eose(vec![Event::new(id('a'), kind::RELAY_LIST, 10)]),
            )
            .relay(
                "wss://two.test",
                RelayScript::eose(vec![
                    Event::new(id('a'), kind::RELAY_LIST, 30),
                    Event::new(id('a'), kind::RELAY_LIST, 20),
                ])
                .delayed(Duration::from_millis(20)),
            );
        let s = session(pool, Arc::new(RelayHealth::default()));
        let mut best = Vec::new();

        let outcome = s
            .run(
                request(&["wss://one.test", "wss://two.test"], 1000),
                &CancellationToken::new(),
                |e| {
                    if let SessionEvent::NewBest { event, .. } = e {
                        best.push(event.created_at);
                    }
                },
            )
            .await;

        assert_eq!(outcome.end, SessionEnd::Completed);
        assert_eq!(outcome.eose, 2);
        assert_eq!(best, vec![10, 30]);
        assert_eq!(
            s.tracker.lock().latest(&id('a'), kind::RELAY_LIST).unwrap().created_at,
            30
        );
    }

    #[tokio::test]
    async fn test_silent_relay_times_out() {
        let pool = ScriptedPool::new()
            .relay("wss://fast.test", RelayScript::eose(vec![]))
            .relay("wss://silent.test", RelayScript::silent());
        let s = session(pool, Arc::new(RelayHealth::default()));
        let mut states = Vec::new();

        let outcome = s
            .run(
                request(&["wss://fast.test", "wss://silent.test"], 50),
                &CancellationToken::new(),
                |e| {
                    if let SessionEvent::RelayState { relay, state } = e {
                        states.push((relay, state));
                    }
                },
            )
            .await;

        assert_eq!(outcome.end, SessionEnd::TimedOut);
        assert_eq!(outcome.timeouts, 1);
        assert!(states.contains(&("wss://fast.test".to_string(), RelayState::Eose)));
        assert!(states.contains(&("wss://silent.test".to_string(), RelayState::Timeout)));
    }

    #[tokio::test]
    async fn test_errors_feed_health_and_unhealthy_relays_are_skipped() {
        let health = Arc::new(RelayHealth::new(1));
        let pool = ScriptedPool::new().relay("wss://broken.test", RelayScript::error("refused"));
        let s = session(pool.clone(), health.clone());

        let outcome = s
            .run(request(&["wss://broken.test"], 500), &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome.errors, 1);
        assert!(!health.is_healthy("wss://broken.test"));

        let outcome = s
            .run(request(&["wss://broken.test"], 500), &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome.endpoints, 0);
        assert_eq!(pool.query_count(), 1);
    }

    #[tokio::test]
    async fn test_relay_dropped_without_eose_ends_in_error() {
        let health = Arc::new(RelayHealth::new(1));
        let pool = ScriptedPool::new().relay("wss://gone.test", RelayScript::dropped());
        let s = session(pool, health.clone());
        let mut states = Vec::new();

        let outcome = s
            .run(request(&["wss://gone.test"], 5000), &CancellationToken::new(), |e| {
                if let SessionEvent::RelayState { state, .. } = e {
                    states.push(state);
                }
            })
            .await;

        assert_eq!(outcome.end, SessionEnd::Completed);
        assert_eq!(outcome.errors, 1);
        assert_eq!(states, vec![RelayState::Connecting, RelayState::Error]);
        // not a transport failure the pool reported
        assert!(health.is_healthy("wss://gone.test"));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_count_a_shared_failure_once() {
        let health = Arc::new(RelayHealth::new(3));
        let pool = ScriptedPool::new().relay(
            "wss://down.test",
            RelayScript::error("refused").delayed(Duration::from_millis(20)),
        );
        let s = session(pool, health.clone());
        let cancel = CancellationToken::new();

        let (a, b, c) = tokio::join!(
            s.run(request(&["wss://down.test"], 1000), &cancel, |_| {}),
            s.run(request(&["wss://down.test"], 1000), &cancel, |_| {}),
            s.run(request(&["wss://down.test"], 1000), &cancel, |_| {}),
        );

        assert_eq!(a.errors + b.errors + c.errors, 3);
        assert_eq!(health.failures("wss://down.test"), 1);
        assert!(health.is_healthy("wss://down.test"));

        // a later session gets a fresh connection, which is a new failure
        s.run(request(&["wss://down.test"], 1000), &cancel, |_| {})
            .await;
        assert_eq!(health.failures("wss://down.test"), 2);
    }

    #[tokio::test]
    async fn test_refused_connection_shared_by_sessions_counts_once() {
        let pool: Arc<dyn RelayPool> = Arc::new(relaycover_pool::WsRelayPool::new(
            relaycover_pool::PoolConfig {
                connect_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        ));
        let health = Arc::new(RelayHealth::new(3));
        let s = SubscriptionSession::new(
            pool,
            health.clone(),
            Arc::new(Mutex::new(LatestEventTracker::new())),
        );
        let cancel = CancellationToken::new();
        // port 9 on loopback: connection refused
        let relay = "ws://127.0.0.1:9";

        let (a, b, c) = tokio::join!(
            s.run(request(&[relay], 2000), &cancel, |_| {}),
            s.run(request(&[relay], 2000), &cancel, |_| {}),
            s.run(request(&[relay], 2000), &cancel, |_| {}),
        );

        for outcome in [a, b, c] {
            assert_eq!(outcome.errors, 1);
        }
        assert_eq!(health.failures(relay), 1);
        assert!(health.is_healthy(relay));
    }

    #[tokio::test]
    async fn test_cancelled_session_emits_nothing_after_cancel() {
        let pool = ScriptedPool::new().relay(
            "wss://slow.test",
            RelayScript::eose(vec![Event::new(id('a'), kind::RELAY_LIST, 5)])
                .delayed(Duration::from_millis(100)),
        );
        let s = session(pool.clone(), Arc::new(RelayHealth::default()));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let mut new_best = 0;
        let outcome = s
            .run(request(&["wss://slow.test"], 1000), &cancel, |e| {
                if matches!(e, SessionEvent::NewBest { .. }) {
                    new_best += 1;
                }
            })
            .await;

        assert_eq!(outcome.end, SessionEnd::Cancelled);
        assert_eq!(new_best, 0);
        assert!(s.tracker.lock().is_empty());
        assert_eq!(pool.open_queries(), 0);
    }

    #[tokio::test]
    async fn test_empty_endpoint_set_completes_immediately() {
        let s = session(ScriptedPool::new(), Arc::new(RelayHealth::default()));
        let outcome = s
            .run(request(&[], 1000), &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome.end, SessionEnd::Completed);
        assert_eq!(outcome.endpoints, 0);
    }
}
