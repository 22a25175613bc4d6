//! Session lifecycle orchestration.
//!
//! Connect sequencing (auth hook, registration, welcome), event dispatch
//! with ack correlation, and exactly-once disconnect teardown.

use crate::connection::{Connection, Outbound};
use crate::message::now_iso;
use crate::registry::{Registry, RegistryError};
use crate::room::RoomDirectory;
use crate::router::EventRouter;
use async_trait::async_trait;
use relay_protocol::{AckPayload, ClientEvent, Envelope, RoomEvent, ServerEvent, Welcome};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Greeting sent to every new connection.
const WELCOME_MESSAGE: &str = "Welcome to the Relay server!";

/// Session errors surfaced to the transport layer at connect time.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The auth hook refused the connection.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Invariant violation: the generated id is already registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Pluggable authentication hook, consulted before a connection is
/// registered. Authorization logic itself is out of scope here; the seam is
/// what matters.
#[async_trait]
pub trait AuthHook: Send + Sync {
    /// Authenticate a connecting client.
    ///
    /// # Errors
    ///
    /// Returns a human-readable rejection reason to refuse the connection.
    async fn authenticate(&self, connection_id: &str, token: Option<&str>) -> Result<(), String>;
}

/// Default hook that accepts every connection.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthHook for AllowAll {
    async fn authenticate(&self, _connection_id: &str, _token: Option<&str>) -> Result<(), String> {
        Ok(())
    }
}

/// Orchestrates the per-connection state machine:
/// `connecting -> connected -> (in-room) -> disconnected`.
pub struct SessionManager {
    registry: Arc<Registry>,
    rooms: Arc<RoomDirectory>,
    router: EventRouter,
    auth: Arc<dyn AuthHook>,
}

impl SessionManager {
    /// Create a session manager with the default allow-all auth hook.
    #[must_use]
    pub fn new(registry: Arc<Registry>, rooms: Arc<RoomDirectory>) -> Self {
        Self::with_auth(registry, rooms, Arc::new(AllowAll))
    }

    /// Create a session manager with a custom auth hook.
    #[must_use]
    pub fn with_auth(
        registry: Arc<Registry>,
        rooms: Arc<RoomDirectory>,
        auth: Arc<dyn AuthHook>,
    ) -> Self {
        let router = EventRouter::new(registry.clone(), rooms.clone());
        Self {
            registry,
            rooms,
            router,
            auth,
        }
    }

    /// Shared connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Shared room directory.
    #[must_use]
    pub fn rooms(&self) -> &Arc<RoomDirectory> {
        &self.rooms
    }

    /// Bring a new connection into the `connected` state.
    ///
    /// Runs the auth hook, registers the connection, and queues the welcome
    /// event for the new connection only.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth hook rejects the client or the id is
    /// already registered (invariant violation; logged, never a panic).
    pub async fn connect(
        &self,
        id: &str,
        sender: UnboundedSender<Outbound>,
        token: Option<&str>,
    ) -> Result<(), SessionError> {
        if let Err(reason) = self.auth.authenticate(id, token).await {
            warn!(connection = %id, reason = %reason, "Authentication rejected");
            return Err(SessionError::AuthRejected(reason));
        }

        self.registry
            .register(Connection::new(id, sender))
            .map_err(|e| {
                error!(connection = %id, error = %e, "Registration failed");
                e
            })?;

        self.registry.send_to(
            id,
            ServerEvent::Welcome(Welcome {
                message: WELCOME_MESSAGE.to_string(),
                server_time: now_iso(),
                socket_id: id.to_string(),
            }),
        );

        info!(connection = %id, "Client connected");
        Ok(())
    }

    /// Dispatch one inbound envelope from a connection.
    ///
    /// Protocol errors never drop the connection: they become a failure ack
    /// when the client asked for one, otherwise a log line.
    pub fn dispatch(&self, sender_id: &str, envelope: Envelope) {
        match ClientEvent::from_envelope(&envelope) {
            Ok(event) => {
                let ack = self.router.handle(sender_id, event);
                if let (Some(ack_id), Some(payload)) = (envelope.ack_id, ack) {
                    self.registry.send_ack(sender_id, ack_id, payload);
                }
            }
            Err(e) => {
                warn!(connection = %sender_id, error = %e, "Rejected inbound event");
                if let Some(ack_id) = envelope.ack_id {
                    self.registry
                        .send_ack(sender_id, ack_id, AckPayload::err(e.to_string()));
                }
            }
        }
    }

    /// Tear a connection down.
    ///
    /// Safe to call more than once; only the call that actually removes the
    /// connection from the registry runs the teardown, so remaining room
    /// members hear exactly one `user:left` per disconnect.
    pub fn disconnect(&self, id: &str, reason: &str) {
        let Some(connection) = self.registry.remove(id) else {
            debug!(connection = %id, "Teardown skipped for unknown connection");
            return;
        };

        self.rooms.leave_all(id);

        if let Some(room) = connection.current_room {
            let event = ServerEvent::UserLeft(RoomEvent {
                user_id: id.to_string(),
                room_name: room.clone(),
                timestamp: now_iso(),
            });
            for member in self.rooms.members(&room) {
                self.registry.send_to(&member, event.clone());
            }
        }

        info!(connection = %id, reason = %reason, "Client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

    struct Deny;

    #[async_trait]
    impl AuthHook for Deny {
        async fn authenticate(&self, _id: &str, _token: Option<&str>) -> Result<(), String> {
            Err("no token".to_string())
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(Registry::new()), Arc::new(RoomDirectory::new()))
    }

    async fn connect(sessions: &SessionManager, id: &str) -> UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.connect(id, tx, None).await.unwrap();
        rx
    }

    fn join(sessions: &SessionManager, id: &str, room: &str) {
        sessions.dispatch(id, Envelope::new("join:room", json!(room)));
    }

    #[tokio::test]
    async fn test_connect_sends_welcome_to_new_connection_only() {
        let sessions = manager();
        let mut rx_a = connect(&sessions, "a").await;
        let mut rx_b = connect(&sessions, "b").await;

        match rx_b.try_recv() {
            Ok(Outbound::Event(ServerEvent::Welcome(w))) => {
                assert_eq!(w.socket_id, "b");
                assert!(!w.message.is_empty());
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
        // "a" got its own welcome and nothing about "b" connecting
        assert!(matches!(
            rx_a.try_recv(),
            Ok(Outbound::Event(ServerEvent::Welcome(_)))
        ));
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_auth_hook_can_refuse() {
        let sessions = SessionManager::with_auth(
            Arc::new(Registry::new()),
            Arc::new(RoomDirectory::new()),
            Arc::new(Deny),
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            sessions.connect("a", tx, None).await,
            Err(SessionError::AuthRejected(_))
        ));
        assert!(sessions.registry().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_correlates_ack() {
        let sessions = manager();
        let mut rx = connect(&sessions, "a").await;
        rx.try_recv().ok(); // welcome

        sessions.dispatch(
            "a",
            Envelope {
                event: "join:room".to_string(),
                data: json!("lobby"),
                ack_id: Some(9),
            },
        );

        match rx.try_recv() {
            Ok(Outbound::Ack { ack_id, payload }) => {
                assert_eq!(ack_id, 9);
                assert!(payload.success);
                assert_eq!(payload.room_name.as_deref(), Some("lobby"));
            }
            other => panic!("Expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_ack_id_sends_no_ack() {
        let sessions = manager();
        let mut rx = connect(&sessions, "a").await;
        rx.try_recv().ok(); // welcome

        sessions.dispatch("a", Envelope::new("custom:event", json!({"k": 1})));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_malformed_event_yields_failure_ack_and_keeps_connection() {
        let sessions = manager();
        let mut rx = connect(&sessions, "a").await;
        rx.try_recv().ok(); // welcome

        sessions.dispatch(
            "a",
            Envelope {
                event: "message:send".to_string(),
                data: json!("not an object"),
                ack_id: Some(4),
            },
        );

        match rx.try_recv() {
            Ok(Outbound::Ack { ack_id, payload }) => {
                assert_eq!(ack_id, 4);
                assert!(!payload.success);
                assert!(!payload.message.is_empty());
            }
            other => panic!("Expected failure ack, got {:?}", other),
        }
        assert!(sessions.registry().contains("a"));
    }

    #[tokio::test]
    async fn test_unknown_event_without_ack_is_only_logged() {
        let sessions = manager();
        let mut rx = connect(&sessions, "a").await;
        rx.try_recv().ok(); // welcome

        sessions.dispatch("a", Envelope::new("mystery:event", json!(1)));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(sessions.registry().contains("a"));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_room_exactly_once() {
        let sessions = manager();
        let _rx_a = connect(&sessions, "a").await;
        let mut rx_b = connect(&sessions, "b").await;
        join(&sessions, "a", "lobby");
        join(&sessions, "b", "lobby");
        while rx_b.try_recv().is_ok() {}

        sessions.disconnect("a", "transport closed");
        sessions.disconnect("a", "transport closed"); // double teardown

        match rx_b.try_recv() {
            Ok(Outbound::Event(ServerEvent::UserLeft(ev))) => {
                assert_eq!(ev.user_id, "a");
                assert_eq!(ev.room_name, "lobby");
            }
            other => panic!("Expected user:left, got {:?}", other),
        }
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
        assert!(!sessions.registry().contains("a"));
        assert_eq!(sessions.rooms().members("lobby"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_room() {
        let sessions = manager();
        let _rx_a = connect(&sessions, "a").await;
        join(&sessions, "a", "lobby");
        // membership outside currentRoom, as the audio path creates
        sessions.rooms().join("art", "a");

        sessions.disconnect("a", "gone");

        assert!(!sessions.rooms().contains("art"));
        assert!(!sessions.rooms().contains("lobby"));
    }

    #[tokio::test]
    async fn test_disconnect_without_room_is_quiet() {
        let sessions = manager();
        let _rx_a = connect(&sessions, "a").await;
        let mut rx_b = connect(&sessions, "b").await;
        rx_b.try_recv().ok(); // welcome

        sessions.disconnect("a", "bye");
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
    }
}
