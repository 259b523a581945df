//! NIP-01 wire messages
//!
//! Client → relay: `["REQ", sub, filter]`, `["CLOSE", sub]`.
//! Relay → client: `EVENT`, `EOSE`, `CLOSED`, `NOTICE`; anything else is
//! surfaced as `Other` and ignored by the pool.

use relaycover_core::{Event, Filter};
use serde_json::{json, Value};

use crate::PoolError;

/// Messages the pool sends to a relay
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Req { sub_id: String, filter: Filter },
    Close { sub_id: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Req { sub_id, filter } => json!(["REQ", sub_id, filter]).to_string(),
            ClientMessage::Close { sub_id } => json!(["CLOSE", sub_id]).to_string(),
        }
    }
}

/// Messages a relay sends back
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { sub_id: String, event: Box<Event> },
    Eose { sub_id: String },
    Closed { sub_id: String, message: String },
    Notice { message: String },
    Other(String),
}

/// Decode one text frame from a relay.
pub fn parse_relay_message(text: &str) -> Result<RelayMessage, PoolError> {
    let mut items: Vec<Value> =
        serde_json::from_str(text).map_err(|e| PoolError::Protocol(e.to_string()))?;
    if items.is_empty() {
        return Err(PoolError::Protocol("empty message".into()));
    }

    let label = items[0]
        .as_str()
        .ok_or_else(|| PoolError::Protocol("message label is not a string".into()))?
        .to_string();
    let text_at = |items: &[Value], i: usize| {
        items
            .get(i)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };

    match label.as_str() {
        "EVENT" => {
            if items.len() < 3 {
                return Err(PoolError::Protocol("EVENT without payload".into()));
            }
            let sub_id = text_at(&items, 1);
            let event: Event = serde_json::from_value(items.swap_remove(2))
                .map_err(|e| PoolError::Protocol(format!("bad event: {}", e)))?;
            Ok(RelayMessage::Event {
                sub_id,
                event: Box::new(event),
            })
        }
        "EOSE" => Ok(RelayMessage::Eose {
            sub_id: text_at(&items, 1),
        }),
        "CLOSED" => Ok(RelayMessage::Closed {
            sub_id: text_at(&items, 1),
            message: text_at(&items, 2),
        }),
        "NOTICE" => Ok(RelayMessage::Notice {
            message: text_at(&items, 1),
        }),
        other => Ok(RelayMessage::Other(other.to_string())),
    }
}
