//! Frame types for the realtime connection.
//!
//! Every frame in either direction is a JSON object of the shape
//! `{"type": string, "payload": object}`. The server's message set is open:
//! new types appear without a protocol bump, so inbound frames are routed on
//! the declared type string instead of a closed enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::PlayerId;

/// Generic frame type used when an inbound frame declares none.
pub const EVENT_TYPE: &str = "event";

/// Type string of the identify handshake frame.
pub const IDENTIFY_TYPE: &str = "identify";

// =============================================================================
// Wire envelope
// =============================================================================

/// The `{type, payload}` frame exchanged over the realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// The identify handshake, sent first after every successful open.
    pub fn identify(player_id: &PlayerId) -> Self {
        Self::new(
            IDENTIFY_TYPE,
            serde_json::json!({ "player_id": player_id }),
        )
    }
}

// =============================================================================
// Inbound classification
// =============================================================================

/// An inbound frame, classified once at decode time.
///
/// A generic `event` frame whose payload carries a `kind` discriminator is
/// lifted into [`RoutedFrame::Kinded`] here, so consumers can subscribe to the
/// derived `event:{kind}` topic without probing payload shapes themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedFrame {
    /// A frame routed under its declared type only.
    Generic { topic: String, payload: Value },
    /// An `event` frame with a secondary discriminator; routed under both the
    /// generic `event` topic and the derived `event:{kind}` topic.
    Kinded { kind: String, payload: Value },
}

impl RoutedFrame {
    /// Decode a raw text frame.
    ///
    /// Mirrors the server's loose framing: a frame with no `type` is treated
    /// as a generic event, and a frame with no `payload` carries itself as
    /// the payload. Only non-JSON input is an error.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;

        let topic = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(EVENT_TYPE)
            .to_string();
        let payload = match raw.get("payload") {
            Some(p) => p.clone(),
            None => raw,
        };

        if topic == EVENT_TYPE {
            if let Some(kind) = payload.get("kind").and_then(Value::as_str) {
                return Ok(RoutedFrame::Kinded {
                    kind: kind.to_string(),
                    payload,
                });
            }
        }

        Ok(RoutedFrame::Generic { topic, payload })
    }
}
