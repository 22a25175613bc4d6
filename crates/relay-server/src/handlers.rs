//! Connection handlers for the Relay server.
//!
//! One task per connection: inbound frames are decoded and dispatched into
//! the session layer, outbound items arrive on the connection's mpsc channel
//! and are written to the socket. The core never touches the socket itself.

use crate::admin;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use relay_core::{generate_connection_id, Outbound, Registry, RoomDirectory, SessionManager};
use relay_protocol::{envelope, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Session lifecycle manager over the shared registry/directory pair.
    pub sessions: SessionManager,
    /// Server configuration.
    pub config: Config,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let rooms = Arc::new(RoomDirectory::new());
        Self {
            sessions: SessionManager::new(registry, rooms),
            config,
            started_at: Instant::now(),
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .merge(admin::routes())
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.sessions.registry().len() >= state.config.limits.max_connections {
        warn!("Connection limit reached, refusing upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = generate_connection_id();
    debug!(connection = %connection_id, "WebSocket connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    // Auth token negotiation is the transport's job; none is carried on the
    // plain WebSocket upgrade today.
    if let Err(e) = state.sessions.connect(&connection_id, out_tx, None).await {
        warn!(connection = %connection_id, error = %e, "Connection refused");
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat = interval(Duration::from_millis(state.config.heartbeat.interval_ms));
    heartbeat.tick().await; // first tick completes immediately
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut last_seen = Instant::now();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Outbound items queued by the core
            Some(item) = out_rx.recv() => {
                if matches!(item, Outbound::Close) {
                    debug!(connection = %connection_id, "Server-initiated close");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                if !write_outbound(&mut sender, &connection_id, &item).await {
                    break;
                }
            }

            // Inbound frames from the socket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        if text.len() > state.config.limits.max_message_size {
                            warn!(connection = %connection_id, size = text.len(), "Frame too large, dropped");
                            metrics::record_error("oversize");
                            continue;
                        }
                        metrics::record_message(text.len(), "inbound");

                        match envelope::decode(&text) {
                            Ok(env) => state.sessions.dispatch(&connection_id, env),
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Undecodable frame");
                                metrics::record_error("protocol");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(connection = %connection_id, "Binary frame ignored");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            // Keepalive and idle detection
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    warn!(connection = %connection_id, "Idle timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.sessions.disconnect(&connection_id, "transport closed");
    metrics::set_active_rooms(state.sessions.rooms().len());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Encode and write one outbound item.
///
/// Returns `false` when the socket is gone and the loop should end.
async fn write_outbound(
    sender: &mut SplitSink<WebSocket, Message>,
    connection_id: &str,
    item: &Outbound,
) -> bool {
    let encoded: Result<String, relay_protocol::ProtocolError> = match item {
        Outbound::Event(event) => serde_json::to_string(event).map_err(Into::into),
        Outbound::Raw(env) => envelope::encode(env),
        Outbound::Ack { ack_id, payload } => envelope::encode(&Envelope::ack(*ack_id, payload)),
        Outbound::Close => return true, // handled by the caller
    };

    match encoded {
        Ok(text) => {
            metrics::record_message(text.len(), "outbound");
            sender.send(Message::Text(text)).await.is_ok()
        }
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Failed to encode outbound item");
            metrics::record_error("encode");
            true
        }
    }
}
