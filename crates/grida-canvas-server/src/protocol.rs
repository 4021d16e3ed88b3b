//! Wire messages exchanged with editor clients.
//!
//! Presence state is relayed as opaque JSON; only document patches are
//! interpreted by the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// CRDT update (base64 encoded Loro bytes)
    Patch { data: String },
    /// Cursor, selection and chat state
    Presence { state: Value },
}

/// A message sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with the merged room state
    Joined {
        room: String,
        peer_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Update from another peer
    Patch { from: String, data: String },
    Presence { from: String, state: Value },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let join: ClientMessage = serde_json::from_str(r#"{"type":"join","room":"r1"}"#).unwrap();
        assert_eq!(join, ClientMessage::Join { room: "r1".into() });

        let presence: ClientMessage =
            serde_json::from_str(r#"{"type":"presence","state":{"cursor":{"x":1,"y":2}}}"#).unwrap();
        let ClientMessage::Presence { state } = presence else {
            panic!("expected presence");
        };
        assert_eq!(state["cursor"]["x"], 1);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"sync"}"#).is_err());
    }

    #[test]
    fn test_joined_omits_missing_snapshot() {
        let joined = ServerMessage::Joined {
            room: "r1".into(),
            peer_count: 1,
            snapshot: None,
        };
        let json = serde_json::to_string(&joined).unwrap();
        assert_eq!(json, r#"{"type":"joined","room":"r1","peer_count":1}"#);
    }
}
