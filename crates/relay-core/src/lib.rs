//! # relay-core
//!
//! Connection tracking, room membership, and event routing for the Relay
//! realtime engine.
//!
//! This crate provides the stateful building blocks:
//!
//! - **Registry** - Owns every live connection and its outbound channel
//! - **RoomDirectory** - Maps room names to member sets
//! - **EventRouter** - Validates inbound events and fans them out
//! - **SessionManager** - Connect/disconnect lifecycle orchestration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │  Transport  │────▶│ SessionMgr   │────▶│  EventRouter  │
//! └─────────────┘     └──────────────┘     └───────────────┘
//!                            │                  │       │
//!                            ▼                  ▼       ▼
//!                     ┌──────────────┐   ┌──────────┐ ┌───────────────┐
//!                     │   Registry   │◀──│ Registry │ │ RoomDirectory │
//!                     └──────────────┘   └──────────┘ └───────────────┘
//! ```
//!
//! The transport seam is a `tokio::sync::mpsc::UnboundedSender<Outbound>`
//! per connection; nothing in this crate performs I/O, which is what makes
//! the routing semantics testable without a live socket.

pub mod connection;
pub mod message;
pub mod registry;
pub mod room;
pub mod router;
pub mod session;

pub use connection::{generate_connection_id, Connection, ConnectionInfo, Outbound};
pub use message::{generate_message_id, now_iso};
pub use registry::{Registry, RegistryError};
pub use room::RoomDirectory;
pub use router::EventRouter;
pub use session::{AllowAll, AuthHook, SessionError, SessionManager};
