//! Room registry.
//!
//! Each room owns a broadcast channel, the set of connected peers and an
//! authoritative Loro document into which every relayed patch is merged, so
//! late joiners receive the full room state in one snapshot.

use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use loro::{ExportMode, LoroDoc};
use tokio::sync::broadcast;

use crate::protocol::ServerMessage;

pub const CHANNEL_CAPACITY: usize = 256;

/// A broadcast envelope: sender peer id plus the message.
pub type Envelope = (String, ServerMessage);

struct Room {
    tx: broadcast::Sender<Envelope>,
    peers: HashSet<String>,
    doc: LoroDoc,
    has_history: bool,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            doc: LoroDoc::new(),
            has_history: false,
        }
    }

    fn snapshot(&self) -> Option<String> {
        if !self.has_history {
            return None;
        }
        match self.doc.export(ExportMode::Snapshot) {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                tracing::warn!("snapshot export failed: {}", e);
                None
            }
        }
    }
}

/// Result of joining a room.
pub struct Joined {
    pub rx: broadcast::Receiver<Envelope>,
    pub snapshot: Option<String>,
    pub peer_count: usize,
}

/// Shared application state
#[derive(Default)]
pub struct Rooms {
    rooms: DashMap<String, Room>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to a room, creating the room on first join.
    pub fn join(&self, room_id: &str, peer_id: &str) -> Joined {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string());
        Joined {
            rx: room.tx.subscribe(),
            snapshot: room.snapshot(),
            peer_count: room.peers.len(),
        }
    }

    /// Remove a peer and tell the others. Empty rooms are dropped.
    pub fn leave(&self, room_id: &str, peer_id: &str) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.peers.remove(peer_id);
        if room.peers.is_empty() {
            drop(room);
            self.rooms.remove_if(room_id, |_, room| room.peers.is_empty());
            tracing::debug!("room {} closed", room_id);
        } else {
            let _ = room.tx.send((
                peer_id.to_string(),
                ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                },
            ));
        }
    }

    /// Merge a base64 patch into the room document and relay it.
    pub fn patch(&self, room_id: &str, peer_id: &str, data: String) -> Result<(), String> {
        let bytes = STANDARD
            .decode(&data)
            .map_err(|e| format!("invalid patch encoding: {e}"))?;
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| format!("unknown room: {room_id}"))?;
        room.doc
            .import(&bytes)
            .map_err(|e| format!("invalid patch: {e}"))?;
        room.has_history = true;
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::Patch {
                from: peer_id.to_string(),
                data,
            },
        ));
        Ok(())
    }

    /// Broadcast a message to everyone in the room except `from`.
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(key: &str, value: &str, peer: u64) -> String {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer).unwrap();
        doc.get_map("nodes").insert(key, value).unwrap();
        STANDARD.encode(doc.export(ExportMode::Snapshot).unwrap())
    }

    #[test]
    fn test_first_joiner_gets_no_snapshot() {
        let rooms = Rooms::new();
        let joined = rooms.join("r1", "a");
        assert!(joined.snapshot.is_none());
        assert_eq!(joined.peer_count, 1);
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn test_late_joiner_gets_merged_snapshot() {
        let rooms = Rooms::new();
        let _a = rooms.join("r1", "a");
        let _b = rooms.join("r1", "b");
        rooms.patch("r1", "a", update("n1", "one", 1)).unwrap();
        rooms.patch("r1", "b", update("n2", "two", 2)).unwrap();

        let joined = rooms.join("r1", "c");
        assert_eq!(joined.peer_count, 3);
        let bytes = STANDARD.decode(joined.snapshot.unwrap()).unwrap();
        let doc = LoroDoc::new();
        doc.import(&bytes).unwrap();
        let nodes = doc.get_map("nodes");
        assert!(nodes.get("n1").is_some());
        assert!(nodes.get("n2").is_some());
    }

    #[test]
    fn test_patch_is_relayed_with_sender() {
        let rooms = Rooms::new();
        let mut joined = rooms.join("r1", "a");
        rooms.patch("r1", "b", update("n1", "one", 1)).unwrap();
        let (from, msg) = joined.rx.try_recv().unwrap();
        assert_eq!(from, "b");
        assert!(matches!(msg, ServerMessage::Patch { from, .. } if from == "b"));
    }

    #[test]
    fn test_invalid_patch_is_rejected() {
        let rooms = Rooms::new();
        let mut joined = rooms.join("r1", "a");
        assert!(rooms.patch("r1", "a", "not base64!".into()).is_err());
        assert!(rooms.patch("r1", "a", STANDARD.encode(b"garbage")).is_err());
        assert!(rooms.patch("missing", "a", update("n", "v", 1)).is_err());
        assert!(joined.rx.try_recv().is_err());
        assert!(rooms.join("r1", "b").snapshot.is_none());
    }

    #[test]
    fn test_empty_room_is_dropped() {
        let rooms = Rooms::new();
        let mut a = rooms.join("r1", "a");
        let _b = rooms.join("r1", "b");
        rooms.leave("r1", "b");
        assert_eq!(rooms.peer_count("r1"), 1);
        let (_, msg) = a.rx.try_recv().unwrap();
        assert_eq!(msg, ServerMessage::PeerLeft { peer_id: "b".into() });

        rooms.leave("r1", "a");
        assert_eq!(rooms.room_count(), 0);
        rooms.leave("r1", "a");
    }
}
