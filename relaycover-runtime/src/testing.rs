//! Scripted relay pool for tests
//!
//! Each relay replays a fixed set of events after an optional delay and then
//! ends with EOSE, an error, silence, or by dropping out without a word.
//!
//! Like a real pool, queries opened against a relay before its scripted
//! error fires share one connection, so they report the same connection id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use relaycover_core::{normalize_relay_url, Event, Filter};
use relaycover_pool::{ConnectionStateChange, PoolMessage, QueryHandle, QueryMode, RelayPool};

#[derive(Debug, Clone)]
enum Ending {
    Eose,
    Error(String),
    /// Holds the query open until it is closed
    Silent,
    /// Goes away without reporting EOSE or an error
    Dropped,
}

#[derive(Debug, Clone)]
pub(crate) struct RelayScript {
    events: Vec<Event>,
    delay: Duration,
    ending: Ending,
}

impl RelayScript {
    pub(crate) fn eose(events: Vec<Event>) -> Self {
        Self {
            events,
            delay: Duration::ZERO,
            ending: Ending::Eose,
        }
    }

    pub(crate) fn error(reason: &str) -> Self {
        Self {
            events: Vec::new(),
            delay: Duration::ZERO,
            ending: Ending::Error(reason.to_string()),
        }
    }

    pub(crate) fn silent() -> Self {
        Self {
            events: Vec::new(),
            delay: Duration::ZERO,
            ending: Ending::Silent,
        }
    }

    pub(crate) fn dropped() -> Self {
        Self {
            events: Vec::new(),
            delay: Duration::ZERO,
            ending: Ending::Dropped,
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedPool {
    relays: Arc<HashMap<String, RelayScript>>,
    queries: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    connections: Arc<Mutex<HashMap<String, u64>>>,
    next_connection: Arc<AtomicU64>,
}

impl ScriptedPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn relay(mut self, url: &str, script: RelayScript) -> Self {
        let mut relays = (*self.relays).clone();
        relays.insert(normalize_relay_url(url), script);
        self.relays = Arc::new(relays);
        self
    }

    /// Queries opened so far
    pub(crate) fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Queries not yet closed
    pub(crate) fn open_queries(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Current connection id for `key`, opening a new one if the last failed
    fn connection(&self, key: &str) -> u64 {
        *self
            .connections
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| self.next_connection.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl RelayPool for ScriptedPool {
    async fn query(&self, endpoints: &[String], filter: Filter, _mode: QueryMode) -> QueryHandle {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let finishing = endpoints
            .iter()
            .filter(|url| {
                !matches!(
                    self.relays.get(&normalize_relay_url(url)).map(|s| &s.ending),
                    Some(Ending::Silent | Ending::Dropped)
                )
            })
            .count();
        let unfinished = finishing < endpoints.len();
        let remaining = Arc::new(AtomicUsize::new(finishing));

        let mut tasks = Vec::new();
        for url in endpoints {
            let key = normalize_relay_url(url);
            let script = self
                .relays
                .get(&key)
                .cloned()
                .unwrap_or_else(|| RelayScript::error("no such relay"));
            let connection = self.connection(&key);
            let connections = self.connections.clone();
            let relay = url.clone();
            let filter = filter.clone();
            let tx = tx.clone();
            let remaining = remaining.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(script.delay).await;
                for event in script.events.into_iter().filter(|e| filter.matches(e)) {
                    let _ = tx.send(PoolMessage::Event {
                        relay: relay.clone(),
                        event,
                    });
                }
                let last = match script.ending {
                    Ending::Eose => PoolMessage::Eose { relay },
                    Ending::Error(reason) => {
                        {
                            let mut connections = connections.lock();
                            if connections.get(&key) == Some(&connection) {
                                connections.remove(&key);
                            }
                        }
                        PoolMessage::Error {
                            relay,
                            reason,
                            connection: Some(connection),
                        }
                    }
                    Ending::Silent => {
                        let _tx = tx;
                        std::future::pending::<()>().await;
                        return;
                    }
                    Ending::Dropped => return,
                };
                let _ = tx.send(last);
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 && !unfinished {
                    let _ = tx.send(PoolMessage::Complete);
                }
            }));
        }
        if endpoints.is_empty() {
            let _ = tx.send(PoolMessage::Complete);
        }

        let open = self.open.clone();
        QueryHandle::new(rx, move || {
            for task in tasks {
                task.abort();
            }
            open.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn connection_states(&self) -> broadcast::Receiver<ConnectionStateChange> {
        broadcast::channel(1).1
    }
}
