//! Connection registry.
//!
//! The registry exclusively owns [`Connection`] records; rooms and routing
//! hold only ids. All mutation goes through the `DashMap`, giving one
//! mutual-exclusion domain for the whole structure.

use crate::connection::{Connection, ConnectionInfo, Outbound};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_protocol::{AckPayload, Envelope, ServerEvent};
use thiserror::Error;
use tracing::{debug, trace};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A connection with this id is already registered. Should never happen
    /// under correct id generation; callers log it and refuse the connection
    /// instead of crashing.
    #[error("Connection id already registered: {0}")]
    DuplicateId(String),
}

/// Tracks every live connection.
#[derive(Debug, Default)]
pub struct Registry {
    connections: DashMap<String, Connection>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether a connection id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Register a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if the id is already present.
    pub fn register(&self, connection: Connection) -> Result<(), RegistryError> {
        match self.connections.entry(connection.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateId(connection.id)),
            Entry::Vacant(slot) => {
                debug!(connection = %connection.id, "Connection registered");
                slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Remove a connection, returning the owned record.
    ///
    /// Idempotent: removing an unknown id returns `None` and is not an
    /// error. The returned record is what keys exactly-once teardown.
    pub fn remove(&self, id: &str) -> Option<Connection> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(connection = %id, "Connection removed");
        }
        removed
    }

    /// Get the connection's current room.
    #[must_use]
    pub fn current_room(&self, id: &str) -> Option<String> {
        self.connections
            .get(id)
            .and_then(|conn| conn.current_room.clone())
    }

    /// Set or clear the connection's current room.
    pub fn set_current_room(&self, id: &str, room: Option<String>) {
        if let Some(mut conn) = self.connections.get_mut(id) {
            conn.current_room = room;
        }
    }

    /// Deliver a protocol event to one connection.
    ///
    /// Returns `false` when the target no longer exists or its transport is
    /// gone; that race with disconnect is silently tolerated.
    pub fn send_to(&self, id: &str, event: ServerEvent) -> bool {
        match self.connections.get(id) {
            Some(conn) => conn.send(event),
            None => {
                trace!(connection = %id, "Dropped delivery to unknown connection");
                false
            }
        }
    }

    /// Deliver a raw envelope to one connection.
    pub fn send_raw(&self, id: &str, envelope: Envelope) -> bool {
        self.connections
            .get(id)
            .map(|conn| conn.push(Outbound::Raw(envelope)))
            .unwrap_or(false)
    }

    /// Deliver an acknowledgement to one connection.
    pub fn send_ack(&self, id: &str, ack_id: u64, payload: AckPayload) -> bool {
        self.connections
            .get(id)
            .map(|conn| conn.push(Outbound::Ack { ack_id, payload }))
            .unwrap_or(false)
    }

    /// Ask a connection's transport task to close.
    ///
    /// The actual teardown runs when the transport loop exits.
    pub fn close(&self, id: &str) -> bool {
        self.connections
            .get(id)
            .map(|conn| conn.push(Outbound::Close))
            .unwrap_or(false)
    }

    /// Deliver an event to every connection except the sender.
    ///
    /// Returns the number of recipients reached.
    pub fn broadcast_except(&self, except: &str, event: &ServerEvent) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.key() != except)
            .filter(|entry| entry.value().send(event.clone()))
            .count()
    }

    /// Deliver a raw envelope to every connection, sender included.
    ///
    /// Operator broadcasts have no sender to exclude.
    pub fn broadcast_raw(&self, envelope: &Envelope) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().push(Outbound::Raw(envelope.clone())))
            .count()
    }

    /// Snapshot of all connection ids.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Administrative snapshot of one connection.
    ///
    /// `rooms` is supplied by the caller, which composes it from the room
    /// directory; the registry does not track membership itself.
    #[must_use]
    pub fn info(&self, id: &str, rooms: Vec<String>) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|conn| conn.info(rooms))
    }
}
