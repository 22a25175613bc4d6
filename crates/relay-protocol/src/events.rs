//! Event types for the Relay protocol.
//!
//! Event names and payload shapes are the interop contract and must not
//! change: payload fields are camelCase on the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Envelope, ProtocolError};

/// Events sent by clients to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join a named room. Carries the bare room name.
    #[serde(rename = "join:room")]
    JoinRoom(String),

    /// Leave a named room. Carries the bare room name.
    #[serde(rename = "leave:room")]
    LeaveRoom(String),

    /// Send a chat message to a room, or broadcast when no room is given.
    #[serde(rename = "message:send")]
    SendMessage(SendMessage),

    /// Signal that the sender started typing in a room.
    #[serde(rename = "typing:start")]
    TypingStart(String),

    /// Signal that the sender stopped typing in a room.
    #[serde(rename = "typing:stop")]
    TypingStop(String),

    /// Application-defined event, relayed to all other connections.
    #[serde(rename = "custom:event")]
    CustomEvent(Value),

    /// Audio playback notification, relayed to the "art" room.
    #[serde(rename = "audio:received")]
    AudioReceived,
}

impl ClientEvent {
    /// Get the wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join:room",
            ClientEvent::LeaveRoom(_) => "leave:room",
            ClientEvent::SendMessage(_) => "message:send",
            ClientEvent::TypingStart(_) => "typing:start",
            ClientEvent::TypingStop(_) => "typing:stop",
            ClientEvent::CustomEvent(_) => "custom:event",
            ClientEvent::AudioReceived => "audio:received",
        }
    }

    /// Build a client event from a decoded envelope.
    ///
    /// The envelope is taken apart by event name rather than deserialized as
    /// a tagged enum so that the `ackId` field can ride alongside and so that
    /// payload failures carry a usable reason string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownEvent`] for event names this server
    /// does not handle, or [`ProtocolError::InvalidPayload`] when the payload
    /// has the wrong shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        match envelope.event.as_str() {
            "join:room" => payload(envelope).map(ClientEvent::JoinRoom),
            "leave:room" => payload(envelope).map(ClientEvent::LeaveRoom),
            "message:send" => payload(envelope).map(ClientEvent::SendMessage),
            "typing:start" => payload(envelope).map(ClientEvent::TypingStart),
            "typing:stop" => payload(envelope).map(ClientEvent::TypingStop),
            "custom:event" => Ok(ClientEvent::CustomEvent(envelope.data.clone())),
            "audio:received" => Ok(ClientEvent::AudioReceived),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    serde_json::from_value(envelope.data.clone()).map_err(|e| ProtocolError::InvalidPayload {
        event: envelope.event.clone(),
        reason: e.to_string(),
    })
}

/// Payload of `message:send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Message body.
    pub content: String,
    /// Target room; absent means broadcast to all other connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
}

/// Events sent by the server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Greeting sent once to a newly connected client.
    #[serde(rename = "welcome")]
    Welcome(Welcome),

    /// A chat message from another connection.
    #[serde(rename = "message:new")]
    NewMessage(ChatMessage),

    /// Another connection joined a room the recipient is in.
    #[serde(rename = "user:joined")]
    UserJoined(RoomEvent),

    /// Another connection left a room the recipient is in.
    #[serde(rename = "user:left")]
    UserLeft(RoomEvent),

    /// Typing state change from another connection.
    #[serde(rename = "typing:update")]
    TypingUpdate(TypingUpdate),

    /// Relayed application-defined event.
    #[serde(rename = "custom:broadcast")]
    CustomBroadcast(CustomBroadcast),

    /// Audio playback notification for the "art" room.
    #[serde(rename = "audio:received")]
    AudioReceived,
}

impl ServerEvent {
    /// Get the wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome(_) => "welcome",
            ServerEvent::NewMessage(_) => "message:new",
            ServerEvent::UserJoined(_) => "user:joined",
            ServerEvent::UserLeft(_) => "user:left",
            ServerEvent::TypingUpdate(_) => "typing:update",
            ServerEvent::CustomBroadcast(_) => "custom:broadcast",
            ServerEvent::AudioReceived => "audio:received",
        }
    }
}

/// Payload of `welcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Human-readable greeting.
    pub message: String,
    /// Server time at connect, ISO-8601.
    pub server_time: String,
    /// The id assigned to the new connection.
    pub socket_id: String,
}

/// Payload of `message:new`.
///
/// Ephemeral: built by the router at send time, delivered, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Generated message id.
    pub id: String,
    /// Originating connection id.
    pub user_id: String,
    /// Message body.
    pub content: String,
    /// Target room; absent for global broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    /// Send time, ISO-8601.
    pub timestamp: String,
}

/// Payload of `user:joined` and `user:left`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    /// Connection that joined or left.
    pub user_id: String,
    /// Room the change happened in.
    pub room_name: String,
    /// Event time, ISO-8601.
    pub timestamp: String,
}

/// Payload of `typing:update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    /// Connection whose typing state changed.
    pub user_id: String,
    /// Whether the user is currently typing.
    pub is_typing: bool,
    /// Room the signal applies to.
    pub room_name: String,
}

/// Payload of `custom:broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomBroadcast {
    /// Originating connection id.
    pub from: String,
    /// The relayed payload, verbatim.
    pub data: Value,
    /// Relay time, ISO-8601.
    pub timestamp: String,
}

/// Acknowledgement payload, correlated to a request by `ackId`.
///
/// Always carries `success` and `message`; `roomName` and `messageId` are
/// filled in per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Whether the request succeeded.
    pub success: bool,
    /// Human-readable outcome description.
    pub message: String,
    /// Room the request applied to, for join/leave acks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    /// Generated message id, for send acks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl AckPayload {
    /// Create a success acknowledgement.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            room_name: None,
            message_id: None,
        }
    }

    /// Create a failure acknowledgement with a reason.
    #[must_use]
    pub fn err(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: reason.into(),
            room_name: None,
            message_id: None,
        }
    }

    /// Attach the room name the request applied to.
    #[must_use]
    pub fn with_room(mut self, room_name: impl Into<String>) -> Self {
        self.room_name = Some(room_name.into());
        self
    }

    /// Attach the generated message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}
