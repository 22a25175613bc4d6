//! # relay-protocol
//!
//! Wire event contract for the Relay realtime engine.
//!
//! This crate defines the JSON events exchanged between clients and the
//! server: room membership, chat messages, typing signals, and the
//! acknowledgement payloads correlated to inbound requests.
//!
//! ## Envelope
//!
//! Every frame on the wire is a JSON envelope:
//!
//! ```json
//! {"event": "join:room", "data": "lobby", "ackId": 1}
//! ```
//!
//! `ackId` is client-assigned; when present on an event that supports
//! acknowledgement, the server answers with an `ack` envelope carrying the
//! same id and an [`AckPayload`] as data.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{envelope, ClientEvent};
//!
//! let env = envelope::decode(r#"{"event":"join:room","data":"lobby","ackId":1}"#).unwrap();
//! let event = ClientEvent::from_envelope(&env).unwrap();
//! assert_eq!(event, ClientEvent::JoinRoom("lobby".to_string()));
//! ```

pub mod envelope;
pub mod events;

pub use envelope::{decode, encode, Envelope, ProtocolError};
pub use events::{
    AckPayload, ChatMessage, ClientEvent, CustomBroadcast, RoomEvent, SendMessage, ServerEvent,
    TypingUpdate, Welcome,
};
