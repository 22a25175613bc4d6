//! Administrative HTTP surface.
//!
//! Read-only stats and operator actions, all expressed over the registry and
//! room directory contracts; no state of its own.

use crate::handlers::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use relay_core::now_iso;
use relay_protocol::Envelope;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Build the admin routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/clients", get(clients_handler))
        .route("/api/rooms", get(rooms_handler))
        .route("/api/message/client", post(message_client_handler))
        .route("/api/message/broadcast", post(message_broadcast_handler))
        .route("/api/message/room", post(message_room_handler))
        .route("/api/clients/:client_id", delete(disconnect_client_handler))
}

/// Service banner.
async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "name": "Relay Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api",
            "websocket": state.config.transport.websocket_path,
        }
    }))
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Server statistics.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "connectedClients": state.sessions.registry().len(),
        "rooms": state.sessions.rooms().len(),
        "serverTime": now_iso(),
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// Connected client listing.
async fn clients_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.sessions.registry();
    let rooms = state.sessions.rooms();

    let clients: Vec<Value> = registry
        .ids()
        .into_iter()
        .filter_map(|id| {
            // Implicit self-room first, then directory memberships
            let mut member_of = vec![id.clone()];
            member_of.extend(rooms.rooms_of(&id));
            registry.info(&id, member_of)
        })
        .filter_map(|info| serde_json::to_value(info).ok())
        .collect();

    Json(json!({
        "total": clients.len(),
        "clients": clients,
    }))
}

/// Room listing.
async fn rooms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rooms = state.sessions.rooms();

    let listing: Vec<Value> = rooms
        .all_rooms()
        .into_iter()
        .map(|(name, size)| {
            let members = rooms.members(&name);
            json!({
                "name": name,
                "size": size,
                "members": members,
            })
        })
        .collect();

    Json(json!({
        "total": listing.len(),
        "rooms": listing,
    }))
}

/// Body of `POST /api/message/client`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    client_id: String,
    event: String,
    #[serde(default)]
    data: Value,
}

/// Send an event directly to one client. The only delivery path where the
/// recipient may equal the operator-chosen target regardless of origin.
async fn message_client_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClientMessage>,
) -> impl IntoResponse {
    let envelope = Envelope::new(body.event, body.data);
    if state.sessions.registry().send_raw(&body.client_id, envelope) {
        Json(json!({
            "success": true,
            "message": format!("Message sent to client {}", body.client_id),
        }))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("Client {} not found", body.client_id),
            })),
        )
            .into_response()
    }
}

/// Body of `POST /api/message/broadcast`.
#[derive(Debug, Deserialize)]
struct BroadcastMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Broadcast an event to every connected client.
async fn message_broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BroadcastMessage>,
) -> impl IntoResponse {
    let envelope = Envelope::new(body.event, body.data);
    let recipients = state.sessions.registry().broadcast_raw(&envelope);
    Json(json!({
        "success": true,
        "message": format!("Message broadcasted to {} clients", recipients),
    }))
}

/// Body of `POST /api/message/room`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomMessage {
    room_name: String,
    event: String,
    #[serde(default)]
    data: Value,
}

/// Send an event to every member of a room.
async fn message_room_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RoomMessage>,
) -> impl IntoResponse {
    let envelope = Envelope::new(body.event, body.data);
    let registry = state.sessions.registry();
    for member in state.sessions.rooms().members(&body.room_name) {
        registry.send_raw(&member, envelope.clone());
    }
    Json(json!({
        "success": true,
        "message": format!("Message sent to room {}", body.room_name),
    }))
}

/// Disconnect one client by id.
async fn disconnect_client_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    if state.sessions.registry().close(&client_id) {
        Json(json!({
            "success": true,
            "message": format!("Client {} disconnected", client_id),
        }))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("Client {} not found", client_id),
            })),
        )
            .into_response()
    }
}
