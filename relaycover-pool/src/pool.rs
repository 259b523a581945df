//! The relay pool capability and its WebSocket implementation
//!
//! Every query names its own endpoint set. There is no pool-wide "default
//! relays" selection, so concurrent queries never interfere.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use relaycover_core::{normalize_relay_url, Event, Filter};

use crate::connection::{
    Command, ConnectionStateChange, PoolConfig, PoolError, RelayConnection, SubscriptionSignal,
};

/// How long a query stays open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Finite history: each relay's subscription is closed at its EOSE and
    /// the query completes once every relay has finished or failed
    Backward,
    /// Live: subscriptions stay open until the handle is closed
    Forward,
}

/// What a query yields
#[derive(Debug, Clone, PartialEq)]
pub enum PoolMessage {
    Event { relay: String, event: Event },
    Eose { relay: String },
    /// `connection` names the transport that failed. Errors sharing it are
    /// one failure seen by several queries; `None` means the failure was
    /// scoped to this query (a refused subscription, a bad URL).
    Error {
        relay: String,
        reason: String,
        connection: Option<u64>,
    },
    /// Every relay finished; nothing more will arrive
    Complete,
}

/// Receiving side of one query. Dropping it closes the subscriptions.
pub struct QueryHandle {
    messages: mpsc::UnboundedReceiver<PoolMessage>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl QueryHandle {
    pub fn new(
        messages: mpsc::UnboundedReceiver<PoolMessage>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            messages,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Next message, or `None` once the producer side is gone
    pub async fn next(&mut self) -> Option<PoolMessage> {
        self.messages.recv().await
    }

    /// Release the underlying subscriptions. Idempotent.
    pub fn close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
        self.messages.close();
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// A multiplexer over many relay connections
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Open a query against exactly `endpoints`.
    ///
    /// Per-relay failures arrive as `PoolMessage::Error`; the call itself
    /// never fails.
    async fn query(&self, endpoints: &[String], filter: Filter, mode: QueryMode) -> QueryHandle;

    /// Stream of connection state transitions for every relay
    fn connection_states(&self) -> broadcast::Receiver<ConnectionStateChange>;
}

/// Relay pool speaking NIP-01 over WebSockets
pub struct WsRelayPool {
    config: PoolConfig,
    connections: DashMap<String, RelayConnection>,
    states: broadcast::Sender<ConnectionStateChange>,
}

impl WsRelayPool {
    pub fn new(config: PoolConfig) -> Self {
        let (states, _) = broadcast::channel(config.state_buffer.max(1));
        Self {
            config,
            connections: DashMap::new(),
            states,
        }
    }

    /// Live connection for `relay`, spawning a fresh one if needed
    fn connection(&self, relay: &str) -> RelayConnection {
        let key = normalize_relay_url(relay);
        let mut entry = self
            .connections
            .entry(key)
            .or_insert_with(|| RelayConnection::spawn(relay.to_string(), self.config.clone(), self.states.clone()));
        if !entry.is_alive() {
            trace!("Reconnecting to {}", relay);
            *entry = RelayConnection::spawn(relay.to_string(), self.config.clone(), self.states.clone());
        }
        entry.clone()
    }
}

impl Default for WsRelayPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

fn new_sub_id() -> String {
    let n: u64 = rand::thread_rng().gen();
    format!("rc-{:016x}", n)
}

#[async_trait]
impl RelayPool for WsRelayPool {
    async fn query(&self, endpoints: &[String], filter: Filter, mode: QueryMode) -> QueryHandle {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (sig_tx, mut sig_rx) = mpsc::unbounded_channel::<(String, SubscriptionSignal)>();

        let mut seen = HashSet::new();
        let mut opened: Vec<(String, RelayConnection, String)> = Vec::new();
        for endpoint in endpoints {
            let key = normalize_relay_url(endpoint);
            if !seen.insert(key.clone()) {
                continue;
            }
            if !(key.starts_with("wss://") || key.starts_with("ws://")) {
                let _ = out_tx.send(PoolMessage::Error {
                    relay: endpoint.clone(),
                    reason: PoolError::InvalidUrl(endpoint.clone()).to_string(),
                    connection: None,
                });
                continue;
            }
            let sub_id = new_sub_id();
            let connection = self.connection(endpoint);
            let queued = connection.send(Command::Subscribe {
                sub_id: sub_id.clone(),
                filter: filter.clone(),
                sink: sig_tx.clone(),
            });
            if queued {
                opened.push((endpoint.clone(), connection, sub_id));
            } else {
                let _ = out_tx.send(PoolMessage::Error {
                    relay: endpoint.clone(),
                    reason: "connection task gone".into(),
                    connection: Some(connection.id()),
                });
            }
        }
        drop(sig_tx);

        debug!("Query {:?} over {} relays", mode, opened.len());

        let routes: Vec<(String, String, RelayConnection)> = opened
            .iter()
            .map(|(relay, conn, sub)| (sub.clone(), relay.clone(), conn.clone()))
            .collect();
        let mut pending: HashSet<String> = routes.iter().map(|(sub, ..)| sub.clone()).collect();

        let forward = tokio::spawn(async move {
            if pending.is_empty() {
                let _ = out_tx.send(PoolMessage::Complete);
                return;
            }
            while let Some((sub_id, signal)) = sig_rx.recv().await {
                let Some((_, relay, conn)) = routes.iter().find(|(s, ..)| *s == sub_id) else {
                    continue;
                };
                let message = match signal {
                    SubscriptionSignal::Event(event) => PoolMessage::Event {
                        relay: relay.clone(),
                        event: *event,
                    },
                    SubscriptionSignal::Eose => {
                        if mode == QueryMode::Backward {
                            conn.send(Command::Unsubscribe { sub_id: sub_id.clone() });
                            pending.remove(&sub_id);
                        }
                        PoolMessage::Eose { relay: relay.clone() }
                    }
                    SubscriptionSignal::Failed { reason, connection } => {
                        pending.remove(&sub_id);
                        PoolMessage::Error {
                            relay: relay.clone(),
                            reason,
                            connection,
                        }
                    }
                };
                if out_tx.send(message).is_err() {
                    return;
                }
                if pending.is_empty() {
                    let _ = out_tx.send(PoolMessage::Complete);
                    return;
                }
            }
        });

        let abort = forward.abort_handle();
        QueryHandle::new(out_rx, move || {
            abort.abort();
            for (_, connection, sub_id) in opened {
                connection.send(Command::Unsubscribe { sub_id });
            }
        })
    }

    fn connection_states(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.states.subscribe()
    }
}
