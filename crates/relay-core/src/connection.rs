//! Connection records and the outbound delivery seam.

use chrono::{DateTime, SecondsFormat, Utc};
use relay_protocol::{AckPayload, Envelope, ServerEvent};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Generate a connection id, unique for the process lifetime.
#[must_use]
pub fn generate_connection_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("conn_{:x}", timestamp)
}

/// An item queued for delivery to one connection's transport task.
///
/// Delivery is fire-and-forget: pushing onto the unbounded channel never
/// blocks, so a slow recipient cannot stall the sender's acknowledgement.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A protocol event.
    Event(ServerEvent),
    /// A raw envelope, used by the administrative surface for
    /// operator-defined event names.
    Raw(Envelope),
    /// An acknowledgement correlated to an inbound request.
    Ack {
        /// Client-assigned correlation id.
        ack_id: u64,
        /// Outcome payload.
        payload: AckPayload,
    },
    /// Instruct the transport task to close the connection.
    Close,
}

/// One live transport-level session.
///
/// Owned exclusively by the [`Registry`](crate::Registry); everything else
/// refers to connections by id.
#[derive(Debug)]
pub struct Connection {
    /// Opaque unique id, stable for the connection's lifetime.
    pub id: String,
    /// Set once at creation.
    pub connected_at: DateTime<Utc>,
    /// The single active room, last-joined wins.
    pub current_room: Option<String>,
    sender: UnboundedSender<Outbound>,
}

impl Connection {
    /// Create a new connection record around its outbound channel.
    #[must_use]
    pub fn new(id: impl Into<String>, sender: UnboundedSender<Outbound>) -> Self {
        Self {
            id: id.into(),
            connected_at: Utc::now(),
            current_room: None,
            sender,
        }
    }

    /// Queue an item for delivery.
    ///
    /// Returns `false` if the transport task is gone; losing a race with
    /// disconnect is not an error.
    pub fn push(&self, item: Outbound) -> bool {
        self.sender.send(item).is_ok()
    }

    /// Queue a protocol event for delivery.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.push(Outbound::Event(event))
    }

    /// Snapshot for administrative queries.
    #[must_use]
    pub fn info(&self, rooms: Vec<String>) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            connected_at: self
                .connected_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            current_room: self.current_room.clone(),
            rooms,
        }
    }
}

/// Immutable connection snapshot, serialized for the admin listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: String,
    /// Connect time, ISO-8601.
    pub connected_at: String,
    /// The single active room, if any.
    pub current_room: Option<String>,
    /// All rooms the transport layer considers the connection part of,
    /// leading with the implicit self-room keyed by its id.
    pub rooms: Vec<String>,
}
