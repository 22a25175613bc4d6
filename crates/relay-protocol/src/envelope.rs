//! JSON envelope codec for Relay events.
//!
//! WebSocket text frames already delimit messages, so no length prefix is
//! required; an envelope is one JSON object per frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::events::AckPayload;

/// Event name used for acknowledgement envelopes.
pub const ACK_EVENT: &str = "ack";

/// Protocol errors that can occur while handling inbound frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a valid JSON envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope names an event this server does not handle.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The event is known but its payload has the wrong shape.
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event name the payload was destined for.
        event: String,
        /// Human-readable deserialization failure.
        reason: String,
    },
}

/// A single frame on the wire.
///
/// `data` defaults to JSON null when absent, which is how events without a
/// payload (`audio:received`) travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, e.g. `join:room` or `message:new`.
    pub event: String,

    /// Event payload; shape depends on the event.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Client-assigned acknowledgement correlation id.
    #[serde(rename = "ackId", default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

impl Envelope {
    /// Create an envelope with no acknowledgement id.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ack_id: None,
        }
    }

    /// Create an acknowledgement envelope correlated to a request.
    #[must_use]
    pub fn ack(ack_id: u64, payload: &AckPayload) -> Self {
        Self {
            event: ACK_EVENT.to_string(),
            data: serde_json::to_value(payload).unwrap_or(Value::Null),
            ack_id: Some(ack_id),
        }
    }
}

/// Encode an envelope to a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a JSON text frame into an envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not a valid envelope.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
