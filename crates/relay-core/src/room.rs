//! Room directory.
//!
//! Rooms are named member sets, created lazily on first join and dropped as
//! soon as the last member leaves. The directory stores connection ids only,
//! never connection records, so nothing here can dangle across a disconnect.
//!
//! The directory is multi-room-capable; the single-active-room policy is the
//! caller's concern (see [`EventRouter`](crate::EventRouter)).

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Maps room names to member connection ids.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: DashMap<String, HashSet<String>>,
}

impl RoomDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no rooms exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Add a connection to a room, creating the room if absent.
    ///
    /// Returns `true` if the membership is new. Room names are accepted
    /// as-is, any string included.
    pub fn join(&self, room: &str, connection_id: &str) -> bool {
        let mut members = self.rooms.entry(room.to_string()).or_default();
        let is_new = members.insert(connection_id.to_string());
        if is_new {
            debug!(room = %room, connection = %connection_id, members = members.len(), "Joined room");
        }
        is_new
    }

    /// Remove a connection from a room.
    ///
    /// No-op if either side doesn't exist. The room entry is dropped once
    /// its member set empties.
    pub fn leave(&self, room: &str, connection_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => {
                let removed = members.remove(connection_id);
                let now_empty = members.is_empty();
                drop(members); // release the entry lock before removing
                if now_empty {
                    self.rooms.remove_if(room, |_, members| members.is_empty());
                    debug!(room = %room, "Dropped empty room");
                }
                removed
            }
            None => false,
        };
        if removed {
            debug!(room = %room, connection = %connection_id, "Left room");
        }
        removed
    }

    /// Remove a connection from every room it is in.
    ///
    /// Returns the names of the rooms left.
    pub fn leave_all(&self, connection_id: &str) -> Vec<String> {
        let rooms = self.rooms_of(connection_id);
        for room in &rooms {
            self.leave(room, connection_id);
        }
        rooms
    }

    /// Snapshot of a room's member ids.
    ///
    /// Mutations after the call do not affect the returned set. A missing
    /// room yields an empty snapshot.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Whether a room currently exists.
    #[must_use]
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Snapshot of the rooms a connection is a member of.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|entry| entry.value().contains(connection_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Administrative listing of `(name, member count)` for every room.
    #[must_use]
    pub fn all_rooms(&self) -> Vec<(String, usize)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }
}
