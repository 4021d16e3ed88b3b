//! Collaboration management for real-time multi-user editing.
//!
//! This module bridges the local document and the CRDT mirror. Local changes
//! go out as incremental Loro updates; remote updates are merged into the
//! mirror and the host rebuilds its document from it with
//! [`CollaborationManager::materialize`].
//!
//! The manager can drive a [`Transport`] itself, or leave message delivery to
//! the host through [`CollaborationManager::take_outgoing`].

use std::collections::VecDeque;
use std::time::Instant;

use loro::VersionVector;

use crate::command::Patch;
use crate::config::EditorConfig;
use crate::crdt::CrdtDocument;
use crate::document::Document;
use crate::error::{CommandError, SyncError};
use crate::presence::{Presence, PresenceState};
use crate::sync::{
    ClientMessage, ConnectionState, ServerMessage, SyncEvent, Transport, TransportEvent,
    decode_payload, encode_payload,
};

/// A patch message that could not be sent yet, with the version it starts at.
struct QueuedPatch {
    since: VersionVector,
    json: String,
}

/// Manages collaboration state and synchronization between local and CRDT documents.
pub struct CollaborationManager {
    crdt: CrdtDocument,
    transport: Option<Box<dyn Transport>>,
    connection: ConnectionState,
    /// Room we want to be in.
    room: Option<String>,
    /// Whether the server confirmed the join for the current connection.
    joined: bool,
    presence: Presence,
    /// Messages ready for the wire (JSON strings).
    outgoing: Vec<String>,
    /// Patches waiting for a connection and a joined room.
    queued: VecDeque<QueuedPatch>,
    queue_limit: usize,
    destroyed: bool,
}

impl CollaborationManager {
    /// A manager whose messages the host delivers itself. The connection is
    /// assumed up until [`on_disconnected`](Self::on_disconnected) says otherwise.
    pub fn new(peer_id: u64, config: &EditorConfig) -> Result<Self, SyncError> {
        let crdt = CrdtDocument::with_peer_id(peer_id)?;
        Ok(Self {
            crdt,
            transport: None,
            connection: ConnectionState::Connected,
            room: None,
            joined: false,
            presence: Presence::new(
                peer_id.to_string(),
                config.presence_throttle(),
                config.presence_timeout(),
            ),
            outgoing: Vec::new(),
            queued: VecDeque::new(),
            queue_limit: config.outgoing_queue_limit.max(1),
            destroyed: false,
        })
    }

    /// A manager that drives `transport`, connecting it to `url`.
    pub fn with_transport(
        peer_id: u64,
        config: &EditorConfig,
        mut transport: Box<dyn Transport>,
        url: &str,
    ) -> Result<Self, SyncError> {
        let mut manager = Self::new(peer_id, config)?;
        transport.connect(url)?;
        manager.connection = transport.state();
        manager.transport = Some(transport);
        Ok(manager)
    }

    pub fn peer_id(&self) -> u64 {
        self.crdt.peer_id()
    }

    pub fn crdt(&self) -> &CrdtDocument {
        &self.crdt
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Whether the server confirmed the current room.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn queued_patches(&self) -> usize {
        self.queued.len()
    }

    fn can_send(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    fn push(&mut self, msg: &ClientMessage) {
        match msg.to_json() {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("failed to encode client message: {e}"),
        }
    }

    // --- Room/Connection Management ---

    /// Request to join a room. Re-sent automatically after reconnects.
    pub fn join_room(&mut self, room: &str) {
        if self.destroyed {
            return;
        }
        self.room = Some(room.to_string());
        self.joined = false;
        if self.can_send() {
            self.push(&ClientMessage::Join {
                room: room.to_string(),
            });
        }
    }

    pub fn leave_room(&mut self) {
        if self.destroyed || self.room.take().is_none() {
            return;
        }
        self.joined = false;
        self.presence.clear();
        if self.can_send() {
            self.push(&ClientMessage::Leave);
        }
    }

    /// The connection came (back) up: rejoin the room.
    pub fn on_connected(&mut self) {
        if self.destroyed {
            return;
        }
        log::info!("sync connection established");
        self.connection = ConnectionState::Connected;
        self.joined = false;
        if let Some(room) = self.room.clone() {
            self.push(&ClientMessage::Join { room });
        }
    }

    /// The connection dropped. Unsent messages other than patches are lost.
    pub fn on_disconnected(&mut self) -> SyncError {
        log::warn!("sync connection lost; {} patches queued", self.queued.len());
        self.connection = ConnectionState::Disconnected;
        self.joined = false;
        self.outgoing.clear();
        SyncError::ConnectionLost
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Document sync ---

    /// Seed the mirror with a whole document and queue it for the room.
    pub fn propose_document(&mut self, doc: &Document) -> Result<bool, SyncError> {
        if self.destroyed {
            return Ok(false);
        }
        let before = self.crdt.version();
        self.crdt.write_document(doc)?;
        self.queue_update(before)
    }

    /// Write the records a local change touched and queue the update.
    /// Returns whether anything new was produced.
    pub fn propose(&mut self, doc: &Document, patch: &Patch) -> Result<bool, SyncError> {
        if self.destroyed || patch.is_empty() {
            return Ok(false);
        }
        let before = self.crdt.version();
        if !self.crdt.write_patch(doc, patch)? {
            return Ok(false);
        }
        self.queue_update(before)
    }

    fn queue_update(&mut self, since: VersionVector) -> Result<bool, SyncError> {
        if self.crdt.version() == since {
            return Ok(false);
        }
        let data = encode_payload(&self.crdt.export_updates(&since)?);
        let json = ClientMessage::Patch { data }.to_json()?;
        if self.joined && self.can_send() {
            self.outgoing.push(json);
        } else {
            self.queued.push_back(QueuedPatch { since, json });
            if self.queued.len() > self.queue_limit {
                self.collapse_queue()?;
            }
        }
        Ok(true)
    }

    /// Replace every queued patch with one update covering all of them.
    fn collapse_queue(&mut self) -> Result<(), SyncError> {
        let Some(first) = self.queued.pop_front() else {
            return Ok(());
        };
        log::debug!("collapsing {} queued patches", self.queued.len() + 1);
        let data = encode_payload(&self.crdt.export_updates(&first.since)?);
        let json = ClientMessage::Patch { data }.to_json()?;
        self.queued.clear();
        self.queued.push_back(QueuedPatch {
            since: first.since,
            json,
        });
        Ok(())
    }

    fn flush_queue(&mut self) {
        let queued = std::mem::take(&mut self.queued);
        self.outgoing.extend(queued.into_iter().map(|q| q.json));
    }

    /// Rebuild the document from the merged CRDT state.
    pub fn materialize(&self) -> Result<Document, CommandError> {
        self.crdt.materialize()
    }

    // --- Presence ---

    /// Change local presence. Sent at most once per throttle window; never
    /// queued while offline.
    pub fn update_presence(&mut self, now: Instant, change: impl FnOnce(&mut PresenceState)) {
        if self.destroyed {
            return;
        }
        if let Some(state) = self.presence.update(now, change) {
            self.send_presence(state);
        }
    }

    fn send_presence(&mut self, state: PresenceState) {
        if self.joined && self.can_send() {
            self.push(&ClientMessage::Presence { state });
        }
    }

    /// Trailing presence flush and peer expiry.
    pub fn tick(&mut self, now: Instant) -> Option<SyncEvent> {
        if self.destroyed {
            return None;
        }
        if let Some(state) = self.presence.flush(now) {
            self.send_presence(state);
        }
        let expired = self.presence.gc(now);
        (!expired.is_empty()).then_some(SyncEvent::PresenceExpired { peers: expired })
    }

    // --- Incoming Message Handling ---

    /// Handle an incoming server message.
    pub fn handle_message(&mut self, json: &str) -> Option<SyncEvent> {
        self.handle_message_at(json, Instant::now())
    }

    pub fn handle_message_at(&mut self, json: &str, now: Instant) -> Option<SyncEvent> {
        if self.destroyed {
            return None;
        }
        let msg: ServerMessage = match serde_json::from_str(json) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("failed to parse server message: {e}");
                return None;
            }
        };
        match self.handle_server_message(msg, now) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("dropping server message: {e}");
                Some(SyncEvent::Error {
                    message: e.to_string(),
                })
            }
        }
    }

    fn handle_server_message(
        &mut self,
        msg: ServerMessage,
        now: Instant,
    ) -> Result<Option<SyncEvent>, SyncError> {
        let event = match msg {
            ServerMessage::Joined {
                room,
                peer_count,
                snapshot,
            } => {
                let merged_snapshot = match snapshot {
                    Some(data) => {
                        self.crdt.import(&decode_payload(&data)?)?;
                        true
                    }
                    None => false,
                };
                log::info!("joined room {room} with {peer_count} peers");
                self.room = Some(room.clone());
                self.joined = true;
                self.flush_queue();
                let local = self.presence.local().clone();
                self.send_presence(local);
                SyncEvent::JoinedRoom {
                    room,
                    peer_count,
                    merged_snapshot,
                }
            }
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => {
                self.presence.remove_peer(&peer_id);
                SyncEvent::PeerLeft { peer_id }
            }
            ServerMessage::Patch { from, data } => {
                self.crdt.import(&decode_payload(&data)?)?;
                SyncEvent::PatchReceived { from }
            }
            ServerMessage::Presence { from, state } => {
                self.presence.receive(from.clone(), state, now);
                SyncEvent::PresenceChanged { from }
            }
            ServerMessage::Error { message } => SyncEvent::Error { message },
        };
        Ok(Some(event))
    }

    // --- Transport ---

    /// Pump the attached transport: deliver incoming messages, track the
    /// connection and send what is ready. Without a transport this only runs
    /// the presence timers.
    pub fn poll(&mut self, now: Instant) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        if self.destroyed {
            return events;
        }
        let incoming = match self.transport.as_mut() {
            Some(transport) => transport.poll_events(),
            None => Vec::new(),
        };
        for event in incoming {
            match event {
                TransportEvent::Open => {
                    self.on_connected();
                    events.push(SyncEvent::Connected);
                }
                TransportEvent::Message(json) => {
                    events.extend(self.handle_message_at(&json, now));
                }
                TransportEvent::Closed => {
                    self.on_disconnected();
                    events.push(SyncEvent::ConnectionLost);
                }
                TransportEvent::Error(message) => {
                    self.on_disconnected();
                    self.connection = ConnectionState::Error;
                    events.push(SyncEvent::Error { message });
                }
            }
        }
        events.extend(self.tick(now));
        if self.transport.is_some() {
            self.send_outgoing(&mut events);
        }
        events
    }

    fn send_outgoing(&mut self, events: &mut Vec<SyncEvent>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let mut failed = false;
        for msg in std::mem::take(&mut self.outgoing) {
            if let Err(e) = transport.send(&msg) {
                log::warn!("failed to send sync message: {e}");
                failed = true;
                break;
            }
        }
        if failed {
            transport.disconnect();
            self.on_disconnected();
            events.push(SyncEvent::ConnectionLost);
        }
    }

    /// Reconnect the attached transport to `url`.
    pub fn reconnect(&mut self, url: &str) -> Result<(), SyncError> {
        if self.destroyed {
            return Err(SyncError::ConnectionLost);
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| SyncError::Transport("no transport attached".into()))?;
        transport.disconnect();
        transport.connect(url)?;
        self.connection = transport.state();
        Ok(())
    }

    /// Tear the session down. Idempotent; afterwards nothing is written or sent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        log::info!("destroying collaboration session");
        self.destroyed = true;
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
        }
        self.outgoing.clear();
        self.queued.clear();
        self.presence.clear();
        self.room = None;
        self.joined = false;
        self.connection = ConnectionState::Disconnected;
    }
}

impl Drop for CollaborationManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
