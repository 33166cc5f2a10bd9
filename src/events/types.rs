//! Raw trace events as delivered by the transport, and peer-id extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::peer::Timestamp;

/// Peer identifier used when an event carries none
pub const UNKNOWN_PEER: &str = "unknown";

pub const CONNECTED: &str = "CONNECTED";
pub const DISCONNECTED: &str = "DISCONNECTED";
pub const REQUEST_STATUS: &str = "REQUEST_STATUS";
pub const PEERSCORE: &str = "PEERSCORE";
pub const HANDLE_GOODBYE: &str = "HANDLE_GOODBYE";
pub const GRAFT: &str = "GRAFT";
pub const PRUNE: &str = "PRUNE";

/// Payload keys that may hold a peer identifier, compared case-insensitively
const PEER_ID_KEYS: &[&str] = &["peerid", "peer_id", "remotepeer", "remote_peer"];

/// One decoded line of a trace feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "Type", alias = "type")]
    pub event_type: String,
    /// Missing timestamps are filled in at dispatch time
    #[serde(
        rename = "Timestamp",
        alias = "timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<Timestamp>,
    #[serde(rename = "Payload", alias = "payload", default)]
    pub payload: Value,
}

impl TraceEvent {
    pub fn new(
        event_type: impl Into<String>,
        timestamp: Option<Timestamp>,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            payload,
        }
    }

    /// Peer identifier carried by the payload, or [`UNKNOWN_PEER`].
    pub fn peer_id(&self) -> String {
        extract_peer_id(&self.payload).unwrap_or_else(|| UNKNOWN_PEER.to_string())
    }
}

fn is_peer_id_key(key: &str) -> bool {
    PEER_ID_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

/// A peer id is either a plain string or an object wrapping one.
fn peer_id_value(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("Value")
            .or_else(|| map.get("value"))
            .and_then(Value::as_str)?,
        _ => return None,
    };

    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Search a payload for a peer identifier.
///
/// Keys at the current level win over anything nested; nested objects are
/// searched depth-first.
pub fn extract_peer_id(payload: &Value) -> Option<String> {
    let object = payload.as_object()?;

    object
        .iter()
        .filter(|(key, _)| is_peer_id_key(key))
        .find_map(|(_, value)| peer_id_value(value))
        .or_else(|| {
            object
                .values()
                .filter(|value| value.is_object())
                .find_map(extract_peer_id)
        })
}
