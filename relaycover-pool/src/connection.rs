//! Relay WebSocket connections
//!
//! Each relay gets one long-lived connection task. Subscriptions from many
//! queries are multiplexed over it and routed back by subscription id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use relaycover_core::Filter;

use crate::message::{parse_relay_message, ClientMessage, RelayMessage};

/// Relay pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// WebSocket connect timeout
    pub connect_timeout: Duration,
    /// Buffer for connection state broadcasts
    pub state_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            state_buffer: 256,
        }
    }
}

/// Errors from relay networking
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("Relay {relay} rejected the connection: {reason}")]
    Rejected { relay: String, reason: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed by relay")]
    Closed,

    #[error("Not a websocket URL: {0}")]
    InvalidUrl(String),
}

/// Transport-level state of one relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Rejected,
    Disconnected,
}

/// A connection state transition, broadcast to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateChange {
    pub relay: String,
    pub state: ConnectionState,
}

/// What a connection reports back to the query that owns a subscription
#[derive(Debug, Clone)]
pub(crate) enum SubscriptionSignal {
    Event(Box<relaycover_core::Event>),
    Eose,
    /// `connection` is set when the whole transport failed, so every
    /// subscription sharing it sees the same id
    Failed {
        reason: String,
        connection: Option<u64>,
    },
}

pub(crate) enum Command {
    Subscribe {
        sub_id: String,
        filter: Filter,
        sink: mpsc::UnboundedSender<(String, SubscriptionSignal)>,
    },
    Unsubscribe {
        sub_id: String,
    },
}

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Handle to a relay's connection task
#[derive(Clone)]
pub(crate) struct RelayConnection {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl RelayConnection {
    /// Spawn the connection task for `relay`. Connecting happens in the task.
    pub(crate) fn spawn(
        relay: String,
        config: PoolConfig,
        states: broadcast::Sender<ConnectionStateChange>,
    ) -> Self {
        let id = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(relay, id, config, rx, states));
        Self { id, commands }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Returns false if the connection task has already exited.
    pub(crate) fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }
}

type Subscribers = HashMap<String, mpsc::UnboundedSender<(String, SubscriptionSignal)>>;

async fn run_connection(
    relay: String,
    id: u64,
    config: PoolConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    states: broadcast::Sender<ConnectionStateChange>,
) {
    let publish = |state: ConnectionState| {
        // nobody listening is fine
        let _ = states.send(ConnectionStateChange {
            relay: relay.clone(),
            state,
        });
    };

    publish(ConnectionState::Connecting);
    debug!("Connecting to {}", relay);

    let stream = match tokio::time::timeout(config.connect_timeout, connect_async(relay.as_str())).await
    {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let (state, err) = match e {
                tokio_tungstenite::tungstenite::Error::Http(resp) => (
                    ConnectionState::Rejected,
                    PoolError::Rejected {
                        relay: relay.clone(),
                        reason: format!("HTTP {}", resp.status()),
                    },
                ),
                other => (ConnectionState::Error, PoolError::WebSocket(other)),
            };
            warn!("Relay {} connect failed: {}", relay, err);
            publish(state);
            fail_pending(&relay, id, &mut commands, &err.to_string());
            return;
        }
        Err(_) => {
            let err = PoolError::ConnectTimeout(relay.clone());
            warn!("{}", err);
            publish(ConnectionState::Error);
            fail_pending(&relay, id, &mut commands, &err.to_string());
            return;
        }
    };

    publish(ConnectionState::Connected);
    let (mut write, mut read) = stream.split();
    let mut subscribers: Subscribers = HashMap::new();

    let err = loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    // every pool handle dropped
                    let _ = write.send(Message::Close(None)).await;
                    publish(ConnectionState::Disconnected);
                    return;
                };
                let outgoing = match command {
                    Command::Subscribe { sub_id, filter, sink } => {
                        subscribers.insert(sub_id.clone(), sink);
                        ClientMessage::Req { sub_id, filter }
                    }
                    Command::Unsubscribe { sub_id } => {
                        if subscribers.remove(&sub_id).is_none() {
                            continue;
                        }
                        ClientMessage::Close { sub_id }
                    }
                };
                if let Err(e) = write.send(Message::Text(outgoing.to_json())).await {
                    break PoolError::from(e);
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => route(&relay, &text, &mut subscribers),
                    Some(Ok(Message::Close(_))) | None => break PoolError::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break PoolError::WebSocket(e),
                }
            }
        }
    };

    let reason = err.to_string();
    warn!("Relay {} connection lost: {}", relay, reason);
    publish(ConnectionState::Error);
    for (sub_id, sink) in subscribers.drain() {
        let _ = sink.send((sub_id, transport_failure(id, &reason)));
    }
    fail_pending(&relay, id, &mut commands, &reason);
}

fn transport_failure(id: u64, reason: &str) -> SubscriptionSignal {
    SubscriptionSignal::Failed {
        reason: reason.to_string(),
        connection: Some(id),
    }
}

/// Fail subscriptions that were queued before the connection died.
fn fail_pending(
    relay: &str,
    id: u64,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    reason: &str,
) {
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Subscribe { sub_id, sink, .. } = command {
            trace!("Failing queued subscription {} on {}", sub_id, relay);
            let _ = sink.send((sub_id, transport_failure(id, reason)));
        }
    }
}

fn route(relay: &str, text: &str, subscribers: &mut Subscribers) {
    let message = match parse_relay_message(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Dropping frame from {}: {}", relay, e);
            return;
        }
    };

    let (sub_id, signal) = match message {
        RelayMessage::Event { sub_id, event } => (sub_id, SubscriptionSignal::Event(event)),
        RelayMessage::Eose { sub_id } => (sub_id, SubscriptionSignal::Eose),
        RelayMessage::Closed { sub_id, message } => {
            debug!("Relay {} closed {}: {}", relay, sub_id, message);
            if let Some(sink) = subscribers.remove(&sub_id) {
                let signal = SubscriptionSignal::Failed {
                    reason: message,
                    connection: None,
                };
                let _ = sink.send((sub_id, signal));
            }
            return;
        }
        RelayMessage::Notice { message } => {
            debug!("Notice from {}: {}", relay, message);
            return;
        }
        RelayMessage::Other(label) => {
            trace!("Ignoring {} from {}", label, relay);
            return;
        }
    };

    if let Some(sink) = subscribers.get(&sub_id) {
        if sink.send((sub_id.clone(), signal)).is_err() {
            // query went away without unsubscribing
            subscribers.remove(&sub_id);
        }
    }
}
