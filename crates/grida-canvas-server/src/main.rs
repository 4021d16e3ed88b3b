//! Grida Canvas WebSocket Relay Server
//!
//! Relays CRDT patches and presence between clients in the same room and
//! keeps a merged document per room for late joiners.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "patch", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "presence", "state": { "cursor": { "x": 100, "y": 200 } } }
//! ```

mod protocol;
mod rooms;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::rooms::{Envelope, Rooms};

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grida_canvas_server=info,tower_http=info".into()),
        )
        .init();

    let addr = bind_address(std::env::var("GRIDA_RELAY_ADDR").ok().as_deref());
    let state = Arc::new(Rooms::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Grida relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

fn bind_address(value: Option<&str>) -> SocketAddr {
    let fallback = || SocketAddr::from(([0, 0, 0, 0], 3030));
    match value {
        Some(value) => value.parse().unwrap_or_else(|e| {
            warn!("invalid GRIDA_RELAY_ADDR {:?} ({}), using {}", value, e, DEFAULT_ADDR);
            fallback()
        }),
        None => fallback(),
    }
}

async fn index() -> &'static str {
    "Grida Canvas Relay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<Rooms>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Serialize and send. Returns false once the socket is gone.
async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("failed to encode message: {}", e);
            true
        }
    }
}

/// Per-connection state.
struct Connection {
    peer_id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

impl Connection {
    fn leave(&mut self, rooms: &Rooms) {
        if let Some(room) = self.room.take() {
            rooms.leave(&room, &self.peer_id);
            info!("Peer {} left room {}", self.peer_id, room);
        }
        self.rx = None;
    }

    /// Handle one client message. Returns false when the socket is gone.
    async fn handle(&mut self, msg: ClientMessage, rooms: &Rooms, sender: &mut Sender) -> bool {
        match msg {
            ClientMessage::Join { room } => {
                self.leave(rooms);
                let joined = rooms.join(&room, &self.peer_id);
                self.rx = Some(joined.rx);
                self.room = Some(room.clone());
                let reply = ServerMessage::Joined {
                    room: room.clone(),
                    peer_count: joined.peer_count,
                    snapshot: joined.snapshot,
                };
                if !send(sender, &reply).await {
                    return false;
                }
                rooms.broadcast(
                    &room,
                    &self.peer_id,
                    ServerMessage::PeerJoined {
                        peer_id: self.peer_id.clone(),
                    },
                );
                info!("Peer {} joined room {}", self.peer_id, room);
                true
            }
            ClientMessage::Leave => {
                self.leave(rooms);
                true
            }
            ClientMessage::Patch { data } => self.patch(data, rooms, sender).await,
            ClientMessage::Presence { state } => {
                if let Some(room) = &self.room {
                    rooms.broadcast(
                        room,
                        &self.peer_id,
                        ServerMessage::Presence {
                            from: self.peer_id.clone(),
                            state,
                        },
                    );
                }
                true
            }
        }
    }

    async fn patch(&self, data: String, rooms: &Rooms, sender: &mut Sender) -> bool {
        let Some(room) = &self.room else {
            return send(sender, &ServerMessage::error("join a room before sending patches")).await;
        };
        match rooms.patch(room, &self.peer_id, data) {
            Ok(()) => {
                debug!("Relayed patch from {} in {}", self.peer_id, room);
                true
            }
            Err(message) => {
                warn!("Rejected patch from {}: {}", self.peer_id, message);
                send(sender, &ServerMessage::error(message)).await
            }
        }
    }
}

async fn next_envelope(rx: &mut Option<broadcast::Receiver<Envelope>>) -> Option<Envelope> {
    let Some(receiver) = rx else {
        // No room joined, just wait forever
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(envelope) => return Some(envelope),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Receiver lagged, skipped {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                *rx = None;
                return None;
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, rooms: Arc<Rooms>) {
    let mut conn = Connection {
        peer_id: Uuid::new_v4().to_string(),
        room: None,
        rx: None,
    };
    info!("New connection: {}", conn.peer_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let alive = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => conn.handle(client_msg, &rooms, &mut sender).await,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn.peer_id, e);
                                send(&mut sender, &ServerMessage::error(format!("Invalid message: {e}"))).await
                            }
                        }
                    }
                    // Binary frames carry raw Loro update bytes.
                    Some(Ok(Message::Binary(data))) => {
                        conn.patch(STANDARD.encode(&data), &rooms, &mut sender).await
                    }
                    Some(Ok(Message::Close(_))) | None => false,
                    Some(Ok(_)) => true,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn.peer_id, e);
                        false
                    }
                };
                if !alive {
                    break;
                }
            }

            envelope = next_envelope(&mut conn.rx) => {
                if let Some((from, server_msg)) = envelope {
                    // Don't echo back to sender
                    if from != conn.peer_id && !send(&mut sender, &server_msg).await {
                        break;
                    }
                }
            }
        }
    }

    conn.leave(&rooms);
    info!("Connection closed: {}", conn.peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        assert_eq!(bind_address(None), DEFAULT_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(
            bind_address(Some("127.0.0.1:9000")),
            SocketAddr::from(([127, 0, 0, 1], 9000))
        );
        assert_eq!(bind_address(Some("nonsense")), DEFAULT_ADDR.parse::<SocketAddr>().unwrap());
    }
}
