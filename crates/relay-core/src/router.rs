//! Event routing.
//!
//! The router takes validated inbound events, determines the audience
//! (room, broadcast, or nobody), and delegates delivery to the registry.
//! Acks come back as plain values; the session layer decides whether the
//! client asked for them.

use crate::message::{generate_message_id, now_iso};
use crate::registry::Registry;
use crate::room::RoomDirectory;
use relay_protocol::{
    AckPayload, ChatMessage, ClientEvent, CustomBroadcast, RoomEvent, ServerEvent, TypingUpdate,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Fixed room that `audio:received` events are relayed through.
pub const AUDIO_ROOM: &str = "art";

/// Routes inbound events to their audiences.
///
/// Every room/broadcast path excludes the sender; targeted delivery through
/// the registry is the only way a connection hears its own events.
pub struct EventRouter {
    registry: Arc<Registry>,
    rooms: Arc<RoomDirectory>,
}

impl EventRouter {
    /// Create a router over shared registry and room state.
    #[must_use]
    pub fn new(registry: Arc<Registry>, rooms: Arc<RoomDirectory>) -> Self {
        Self { registry, rooms }
    }

    /// Handle one inbound event from `sender_id`.
    ///
    /// Returns the acknowledgement payload for event kinds that support one,
    /// `None` for fire-and-forget events.
    pub fn handle(&self, sender_id: &str, event: ClientEvent) -> Option<AckPayload> {
        trace!(connection = %sender_id, event = event.name(), "Routing event");
        match event {
            ClientEvent::JoinRoom(room) => Some(self.join_room(sender_id, room)),
            ClientEvent::LeaveRoom(room) => Some(self.leave_room(sender_id, room)),
            ClientEvent::SendMessage(msg) => Some(self.send_message(sender_id, msg)),
            ClientEvent::TypingStart(room) => {
                self.typing_update(sender_id, &room, true);
                None
            }
            ClientEvent::TypingStop(room) => {
                self.typing_update(sender_id, &room, false);
                None
            }
            ClientEvent::CustomEvent(data) => Some(self.custom_event(sender_id, data)),
            ClientEvent::AudioReceived => {
                self.notify_room(AUDIO_ROOM, sender_id, &ServerEvent::AudioReceived);
                None
            }
        }
    }

    fn join_room(&self, sender_id: &str, room: String) -> AckPayload {
        // Single-active-room policy: depart the previous room first, unless
        // the client is rejoining the room it is already in.
        if let Some(prev) = self.registry.current_room(sender_id) {
            if prev != room {
                self.depart(sender_id, &prev);
            }
        }

        self.rooms.join(&room, sender_id);
        self.registry
            .set_current_room(sender_id, Some(room.clone()));

        let notified = self.notify_room(
            &room,
            sender_id,
            &ServerEvent::UserJoined(RoomEvent {
                user_id: sender_id.to_string(),
                room_name: room.clone(),
                timestamp: now_iso(),
            }),
        );
        debug!(connection = %sender_id, room = %room, notified, "Joined room");

        AckPayload::ok(format!("Successfully joined room: {room}")).with_room(room)
    }

    fn leave_room(&self, sender_id: &str, room: String) -> AckPayload {
        self.depart(sender_id, &room);

        if self.registry.current_room(sender_id).as_deref() == Some(room.as_str()) {
            self.registry.set_current_room(sender_id, None);
        }
        debug!(connection = %sender_id, room = %room, "Left room");

        AckPayload::ok(format!("Successfully left room: {room}")).with_room(room)
    }

    /// Drop membership and notify the remaining members.
    fn depart(&self, sender_id: &str, room: &str) {
        self.rooms.leave(room, sender_id);
        self.notify_room(
            room,
            sender_id,
            &ServerEvent::UserLeft(RoomEvent {
                user_id: sender_id.to_string(),
                room_name: room.to_string(),
                timestamp: now_iso(),
            }),
        );
    }

    fn send_message(&self, sender_id: &str, msg: relay_protocol::SendMessage) -> AckPayload {
        let message = ChatMessage {
            id: generate_message_id(),
            user_id: sender_id.to_string(),
            content: msg.content,
            room_name: msg.room_name.clone(),
            timestamp: now_iso(),
        };
        let message_id = message.id.clone();
        let event = ServerEvent::NewMessage(message);

        let recipients = match msg.room_name.as_deref() {
            Some(room) => self.notify_room(room, sender_id, &event),
            None => self.registry.broadcast_except(sender_id, &event),
        };
        debug!(connection = %sender_id, recipients, "Message routed");

        AckPayload::ok("Message sent successfully").with_message_id(message_id)
    }

    fn typing_update(&self, sender_id: &str, room: &str, is_typing: bool) {
        self.notify_room(
            room,
            sender_id,
            &ServerEvent::TypingUpdate(TypingUpdate {
                user_id: sender_id.to_string(),
                is_typing,
                room_name: room.to_string(),
            }),
        );
    }

    fn custom_event(&self, sender_id: &str, data: serde_json::Value) -> AckPayload {
        let event = ServerEvent::CustomBroadcast(CustomBroadcast {
            from: sender_id.to_string(),
            data,
            timestamp: now_iso(),
        });
        let recipients = self.registry.broadcast_except(sender_id, &event);
        debug!(connection = %sender_id, recipients, "Custom event relayed");

        AckPayload::ok("Custom event processed")
    }

    /// Deliver an event to every room member except the sender.
    ///
    /// An empty or missing room is a silent no-op. Returns the number of
    /// recipients reached.
    fn notify_room(&self, room: &str, except: &str, event: &ServerEvent) -> usize {
        self.rooms
            .members(room)
            .iter()
            .filter(|id| id.as_str() != except)
            .filter(|id| self.registry.send_to(id, event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, Outbound};
    use relay_protocol::SendMessage;
    use serde_json::json;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

    struct Harness {
        registry: Arc<Registry>,
        rooms: Arc<RoomDirectory>,
        router: EventRouter,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(Registry::new());
            let rooms = Arc::new(RoomDirectory::new());
            let router = EventRouter::new(registry.clone(), rooms.clone());
            Self {
                registry,
                rooms,
                router,
            }
        }

        fn connect(&self, id: &str) -> UnboundedReceiver<Outbound> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.registry.register(Connection::new(id, tx)).unwrap();
            rx
        }
    }

    fn recv_event(rx: &mut UnboundedReceiver<Outbound>) -> ServerEvent {
        match rx.try_recv() {
            Ok(Outbound::Event(event)) => event,
            other => panic!("Expected an event, got {:?}", other),
        }
    }

    fn assert_silent(rx: &mut UnboundedReceiver<Outbound>) {
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_join_acks_with_room_name() {
        let h = Harness::new();
        let _rx = h.connect("a");

        let ack = h.router.handle("a", ClientEvent::JoinRoom("lobby".into())).unwrap();
        assert!(ack.success);
        assert_eq!(ack.room_name.as_deref(), Some("lobby"));
        assert_eq!(h.registry.current_room("a").as_deref(), Some("lobby"));
        assert_eq!(h.rooms.members("lobby"), vec!["a".to_string()]);
    }

    #[test]
    fn test_join_notifies_existing_members_only() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        let mut rx_b = h.connect("b");

        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));
        assert_silent(&mut rx_a); // nobody to notify, and never the sender

        let ack = h.router.handle("b", ClientEvent::JoinRoom("lobby".into())).unwrap();
        assert!(ack.success);

        match recv_event(&mut rx_a) {
            ServerEvent::UserJoined(ev) => {
                assert_eq!(ev.user_id, "b");
                assert_eq!(ev.room_name, "lobby");
            }
            other => panic!("Expected user:joined, got {:?}", other),
        }
        assert_silent(&mut rx_a);
        assert_silent(&mut rx_b);
    }

    #[test]
    fn test_room_message_excludes_sender() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));
        h.router.handle("b", ClientEvent::JoinRoom("lobby".into()));
        // Drain the join notifications
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        let ack = h
            .router
            .handle(
                "a",
                ClientEvent::SendMessage(SendMessage {
                    content: "hi".into(),
                    room_name: Some("lobby".into()),
                }),
            )
            .unwrap();
        assert!(ack.success);
        assert!(ack.message_id.is_some());

        match recv_event(&mut rx_b) {
            ServerEvent::NewMessage(msg) => {
                assert_eq!(msg.content, "hi");
                assert_eq!(msg.user_id, "a");
                assert_eq!(msg.room_name.as_deref(), Some("lobby"));
                assert_eq!(Some(msg.id), ack.message_id);
            }
            other => panic!("Expected message:new, got {:?}", other),
        }
        assert_silent(&mut rx_a);
    }

    #[test]
    fn test_message_to_empty_room_succeeds() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));

        let ack = h
            .router
            .handle(
                "a",
                ClientEvent::SendMessage(SendMessage {
                    content: "anyone?".into(),
                    room_name: Some("lobby".into()),
                }),
            )
            .unwrap();
        assert!(ack.success);
        assert_silent(&mut rx_a);
    }

    #[test]
    fn test_global_broadcast_excludes_sender() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        let mut rx_c = h.connect("c");

        h.router.handle(
            "a",
            ClientEvent::SendMessage(SendMessage {
                content: "all".into(),
                room_name: None,
            }),
        );

        for rx in [&mut rx_b, &mut rx_c] {
            match recv_event(rx) {
                ServerEvent::NewMessage(msg) => {
                    assert_eq!(msg.user_id, "a");
                    assert!(msg.room_name.is_none());
                }
                other => panic!("Expected message:new, got {:?}", other),
            }
        }
        assert_silent(&mut rx_a);
    }

    #[test]
    fn test_custom_event_broadcast() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        let mut rx_c = h.connect("c");

        let ack = h
            .router
            .handle("a", ClientEvent::CustomEvent(json!({"k": "v"})))
            .unwrap();
        assert!(ack.success);

        for rx in [&mut rx_b, &mut rx_c] {
            match recv_event(rx) {
                ServerEvent::CustomBroadcast(b) => {
                    assert_eq!(b.from, "a");
                    assert_eq!(b.data, json!({"k": "v"}));
                }
                other => panic!("Expected custom:broadcast, got {:?}", other),
            }
        }
        assert_silent(&mut rx_a);
    }

    #[test]
    fn test_switching_rooms_departs_the_old_one() {
        let h = Harness::new();
        let _rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        let mut rx_c = h.connect("c");
        h.router.handle("b", ClientEvent::JoinRoom("room1".into()));
        h.router.handle("c", ClientEvent::JoinRoom("room2".into()));
        h.router.handle("a", ClientEvent::JoinRoom("room1".into()));
        while rx_b.try_recv().is_ok() {}

        h.router.handle("a", ClientEvent::JoinRoom("room2".into()));

        match recv_event(&mut rx_b) {
            ServerEvent::UserLeft(ev) => {
                assert_eq!(ev.user_id, "a");
                assert_eq!(ev.room_name, "room1");
            }
            other => panic!("Expected user:left, got {:?}", other),
        }
        match recv_event(&mut rx_c) {
            ServerEvent::UserJoined(ev) => {
                assert_eq!(ev.user_id, "a");
                assert_eq!(ev.room_name, "room2");
            }
            other => panic!("Expected user:joined, got {:?}", other),
        }
        assert_eq!(h.registry.current_room("a").as_deref(), Some("room2"));
        assert!(!h.rooms.members("room1").contains(&"a".to_string()));
    }

    #[test]
    fn test_rejoining_current_room_emits_no_user_left() {
        let h = Harness::new();
        let _rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));
        h.router.handle("b", ClientEvent::JoinRoom("lobby".into()));

        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));

        match recv_event(&mut rx_b) {
            ServerEvent::UserJoined(ev) => assert_eq!(ev.user_id, "a"),
            other => panic!("Expected user:joined, got {:?}", other),
        }
        assert_silent(&mut rx_b);
    }

    #[test]
    fn test_leave_clears_current_room_only_on_match() {
        let h = Harness::new();
        let _rx = h.connect("a");
        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));

        let ack = h.router.handle("a", ClientEvent::LeaveRoom("elsewhere".into())).unwrap();
        assert!(ack.success);
        assert_eq!(h.registry.current_room("a").as_deref(), Some("lobby"));

        h.router.handle("a", ClientEvent::LeaveRoom("lobby".into()));
        assert_eq!(h.registry.current_room("a"), None);
        assert!(!h.rooms.contains("lobby"));
    }

    #[test]
    fn test_typing_updates_are_fire_and_forget() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));
        h.router.handle("b", ClientEvent::JoinRoom("lobby".into()));
        while rx_a.try_recv().is_ok() {}

        assert!(h.router.handle("a", ClientEvent::TypingStart("lobby".into())).is_none());
        assert!(h.router.handle("a", ClientEvent::TypingStop("lobby".into())).is_none());

        match recv_event(&mut rx_b) {
            ServerEvent::TypingUpdate(t) => {
                assert_eq!(t.user_id, "a");
                assert!(t.is_typing);
            }
            other => panic!("Expected typing:update, got {:?}", other),
        }
        match recv_event(&mut rx_b) {
            ServerEvent::TypingUpdate(t) => assert!(!t.is_typing),
            other => panic!("Expected typing:update, got {:?}", other),
        }
        assert_silent(&mut rx_a);
    }

    #[test]
    fn test_audio_received_routes_through_art_room() {
        let h = Harness::new();
        let mut rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        let mut rx_c = h.connect("c");
        h.router.handle("b", ClientEvent::JoinRoom(AUDIO_ROOM.into()));

        assert!(h.router.handle("a", ClientEvent::AudioReceived).is_none());

        assert!(matches!(recv_event(&mut rx_b), ServerEvent::AudioReceived));
        assert_silent(&mut rx_a);
        assert_silent(&mut rx_c);
    }

    #[test]
    fn test_delivery_survives_concurrently_removed_target() {
        let h = Harness::new();
        let _rx_a = h.connect("a");
        let mut rx_b = h.connect("b");
        h.router.handle("a", ClientEvent::JoinRoom("lobby".into()));
        h.router.handle("b", ClientEvent::JoinRoom("lobby".into()));
        while rx_b.try_recv().is_ok() {}

        // "a" vanishes from the registry but is still in the room set,
        // simulating a disconnect racing the delivery.
        h.registry.remove("a");

        let ack = h
            .router
            .handle(
                "b",
                ClientEvent::SendMessage(SendMessage {
                    content: "still fine".into(),
                    room_name: Some("lobby".into()),
                }),
            )
            .unwrap();
        assert!(ack.success);
    }
}
