//! Wire protocol and transports for collaboration.
//!
//! Messages are JSON objects tagged by `type`. CRDT payloads travel as
//! base64 encoded Loro update bytes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::presence::PresenceState;

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// Incremental CRDT update (base64 encoded Loro bytes)
    Patch { data: String },
    Presence { state: PresenceState },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        peer_count: usize,
        /// Merged room snapshot, if the room has history
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Update from another peer
    Patch { from: String, data: String },
    Presence { from: String, state: PresenceState },
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events surfaced by the collaboration manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    /// The connection dropped. Patches are queued until the room is rejoined.
    ConnectionLost,
    JoinedRoom {
        room: String,
        peer_count: usize,
        /// Whether a room snapshot was merged into the local CRDT.
        merged_snapshot: bool,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// A remote update was merged into the local CRDT.
    PatchReceived { from: String },
    PresenceChanged { from: String },
    /// Remote peers dropped after staying silent too long.
    PresenceExpired { peers: Vec<String> },
    Error { message: String },
}

pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_payload(data: &str) -> Result<Vec<u8>, SyncError> {
    STANDARD
        .decode(data)
        .map_err(|e| SyncError::Protocol(format!("invalid base64 payload: {e}")))
}

/// Low-level events reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Closed,
    Error(String),
}

/// A message pipe to the relay.
///
/// Transports are polled: they never call back into the engine.
pub trait Transport: Send {
    fn connect(&mut self, url: &str) -> Result<(), SyncError>;

    fn send(&mut self, msg: &str) -> Result<(), SyncError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn state(&self) -> ConnectionState;

    fn disconnect(&mut self);
}

// ============================================================================
// In-memory transport
// ============================================================================

#[derive(Debug, Default)]
struct MemoryPipe {
    state: ConnectionState,
    inbox: VecDeque<TransportEvent>,
    sent: Vec<String>,
    url: Option<String>,
}

/// Transport backed by shared memory, driven through a [`MemoryHandle`].
/// Used for tests and for hosts that move bytes themselves.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    pipe: Arc<Mutex<MemoryPipe>>,
}

/// The far end of a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    pipe: Arc<Mutex<MemoryPipe>>,
}

fn lock(pipe: &Mutex<MemoryPipe>) -> MutexGuard<'_, MemoryPipe> {
    pipe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryHandle) {
        let pipe = Arc::new(Mutex::new(MemoryPipe::default()));
        (
            Self { pipe: pipe.clone() },
            MemoryHandle { pipe },
        )
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, url: &str) -> Result<(), SyncError> {
        let mut pipe = lock(&self.pipe);
        pipe.url = Some(url.to_string());
        pipe.state = ConnectionState::Connecting;
        Ok(())
    }

    fn send(&mut self, msg: &str) -> Result<(), SyncError> {
        let mut pipe = lock(&self.pipe);
        if pipe.state != ConnectionState::Connected {
            return Err(SyncError::ConnectionLost);
        }
        pipe.sent.push(msg.to_string());
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        lock(&self.pipe).inbox.drain(..).collect()
    }

    fn state(&self) -> ConnectionState {
        lock(&self.pipe).state
    }

    fn disconnect(&mut self) {
        let mut pipe = lock(&self.pipe);
        pipe.state = ConnectionState::Disconnected;
        pipe.inbox.clear();
    }
}

impl MemoryHandle {
    /// Complete the connection.
    pub fn open(&self) {
        let mut pipe = lock(&self.pipe);
        pipe.state = ConnectionState::Connected;
        pipe.inbox.push_back(TransportEvent::Open);
    }

    /// Drop the connection as if the network failed.
    pub fn close(&self) {
        let mut pipe = lock(&self.pipe);
        pipe.state = ConnectionState::Disconnected;
        pipe.inbox.push_back(TransportEvent::Closed);
    }

    pub fn deliver(&self, msg: &ServerMessage) -> Result<(), SyncError> {
        let json = msg.to_json()?;
        lock(&self.pipe).inbox.push_back(TransportEvent::Message(json));
        Ok(())
    }

    /// Messages the client sent, drained.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.pipe).sent)
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.pipe).state
    }

    pub fn url(&self) -> Option<String> {
        lock(&self.pipe).url.clone()
    }
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        state: ConnectionState,
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    fn run(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<TransportEvent>) {
        log::info!("websocket thread: connecting to {url}");
        let (mut socket, response) = match connect(url.as_str()) {
            Ok(ok) => ok,
            Err(e) => {
                log::error!("websocket connection failed: {e}");
                let _ = event_tx.send(TransportEvent::Error(format!("connection failed: {e}")));
                return;
            }
        };
        log::info!("websocket connected, status: {}", response.status());
        let _ = event_tx.send(TransportEvent::Open);

        // Short read timeout so the loop can service outgoing commands.
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("websocket send error: {e}");
                        break;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("websocket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => {
                    let _ = event_tx.send(TransportEvent::Message(txt.to_string()));
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("websocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("websocket read error: {e}");
                    break;
                }
            }
        }

        log::info!("websocket thread exiting");
        let _ = event_tx.send(TransportEvent::Closed);
    }

    impl Transport for NativeWebSocket {
        fn connect(&mut self, url: &str) -> Result<(), SyncError> {
            if self.cmd_tx.is_some() {
                return Err(SyncError::Transport("already connected".into()));
            }
            let parsed = Url::parse(url).map_err(|e| SyncError::Transport(format!("invalid url: {e}")))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(SyncError::Transport(format!(
                    "invalid websocket url scheme: {}",
                    parsed.scheme()
                )));
            }

            self.state = ConnectionState::Connecting;
            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<TransportEvent>();
            let url = url.to_string();
            let handle = thread::spawn(move || run(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn send(&mut self, msg: &str) -> Result<(), SyncError> {
            let tx = self.cmd_tx.as_ref().ok_or(SyncError::ConnectionLost)?;
            tx.send(WsCommand::Send(msg.to_string()))
                .map_err(|_| SyncError::ConnectionLost)
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let mut events = Vec::new();
            let Some(rx) = &self.event_rx else {
                return events;
            };
            while let Ok(event) = rx.try_recv() {
                match &event {
                    TransportEvent::Open => self.state = ConnectionState::Connected,
                    TransportEvent::Closed => self.state = ConnectionState::Disconnected,
                    TransportEvent::Error(_) => self.state = ConnectionState::Error,
                    TransportEvent::Message(_) => {}
                }
                events.push(event);
            }
            if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Error) {
                // The thread is gone; allow a fresh connect.
                self.cmd_tx = None;
                self.event_rx = None;
                self._thread = None;
            }
            events
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    #[test]
    fn test_payload_roundtrip() {
        let data = b"Hello, World!";
        assert_eq!(decode_payload(&encode_payload(data)).unwrap(), data.to_vec());
        assert_eq!(encode_payload(b"a"), "YQ==");
    }

    #[test]
    fn test_invalid_payload_is_protocol_error() {
        assert!(matches!(decode_payload("***"), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_client_message_shape() {
        let json = ClientMessage::Join { room: "r1".into() }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"join","room":"r1"}"#);
        let json = ClientMessage::Leave.to_json().unwrap();
        assert_eq!(json, r#"{"type":"leave"}"#);
    }

    #[test]
    fn test_server_message_parse() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"joined","room":"r1","peer_count":2}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Joined {
                room: "r1".into(),
                peer_count: 2,
                snapshot: None
            }
        );
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"presence","from":"p2","state":{"cursor_id":"c2","position":{"x":1.0,"y":2.0}}}"#,
        )
        .unwrap();
        let ServerMessage::Presence { from, state } = msg else {
            panic!("expected presence");
        };
        assert_eq!(from, "p2");
        assert_eq!(state.position, Some(Point::new(1.0, 2.0)));
    }

    #[test]
    fn test_memory_transport() {
        let (mut transport, handle) = MemoryTransport::new();
        transport.connect("mem://room").unwrap();
        assert!(transport.send("early").is_err());
        handle.open();
        assert_eq!(transport.poll_events(), vec![TransportEvent::Open]);
        transport.send("hello").unwrap();
        assert_eq!(handle.take_sent(), vec!["hello".to_string()]);
        handle.close();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.poll_events(), vec![TransportEvent::Closed]);
    }
}
