//! Ephemeral per-peer presence: cursors, selections and cursor chat.
//!
//! Presence never touches the document or the undo history. Local updates
//! are throttled with a trailing flush so the last state always goes out;
//! remote peers that stay silent past the timeout are dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPalette {
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub txt: String,
    /// Unix time in milliseconds.
    pub ts: u64,
}

/// The presence record one peer broadcasts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    pub cursor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<CursorPalette>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selection: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marquee: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_chat: Option<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePeer {
    pub state: PresenceState,
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct Presence {
    local: PresenceState,
    throttle: Duration,
    timeout: Duration,
    last_sent: Option<Instant>,
    pending: bool,
    peers: HashMap<String, RemotePeer>,
}

impl Presence {
    pub fn new(cursor_id: impl Into<String>, throttle: Duration, timeout: Duration) -> Self {
        Self {
            local: PresenceState {
                cursor_id: cursor_id.into(),
                ..Default::default()
            },
            throttle,
            timeout,
            last_sent: None,
            pending: false,
            peers: HashMap::new(),
        }
    }

    pub fn local(&self) -> &PresenceState {
        &self.local
    }

    /// Change the local state. Returns the state to broadcast now, or `None`
    /// when throttled; a throttled change is sent by [`Presence::flush`].
    pub fn update(
        &mut self,
        now: Instant,
        change: impl FnOnce(&mut PresenceState),
    ) -> Option<PresenceState> {
        let before = self.local.clone();
        change(&mut self.local);
        if self.local == before {
            return None;
        }
        self.pending = true;
        self.flush(now)
    }

    /// Trailing flush: emit a pending state once the throttle window passed.
    pub fn flush(&mut self, now: Instant) -> Option<PresenceState> {
        if !self.pending {
            return None;
        }
        let ready = self
            .last_sent
            .is_none_or(|t| now.saturating_duration_since(t) >= self.throttle);
        if !ready {
            return None;
        }
        self.pending = false;
        self.last_sent = Some(now);
        Some(self.local.clone())
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Record a state received from `from`.
    pub fn receive(&mut self, from: impl Into<String>, state: PresenceState, now: Instant) {
        self.peers.insert(
            from.into(),
            RemotePeer {
                state,
                last_seen: now,
            },
        );
    }

    pub fn remove_peer(&mut self, from: &str) -> bool {
        self.peers.remove(from).is_some()
    }

    /// Drop peers silent for longer than the timeout. Returns their ids.
    pub fn gc(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.timeout;
        let mut dropped: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        dropped.sort();
        for id in &dropped {
            log::debug!("presence timeout for peer {id}");
            self.peers.remove(id);
        }
        dropped
    }

    pub fn peer(&self, from: &str) -> Option<&RemotePeer> {
        self.peers.get(from)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&String, &RemotePeer)> {
        self.peers.iter()
    }

    /// Remote peer whose `cursor_id` matches.
    pub fn find_cursor(&self, cursor_id: &str) -> Option<&RemotePeer> {
        self.peers.values().find(|p| p.state.cursor_id == cursor_id)
    }

    /// Forget all remote state and any pending local broadcast.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.pending = false;
        self.last_sent = None;
    }
}
