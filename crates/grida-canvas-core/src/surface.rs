//! Surface state: view toggles, clipboard, cursor chat and follow mode.

use std::time::{Duration, Instant};

use kurbo::Rect;
use serde::{Deserialize, Serialize};

use crate::document::Fragment;
use crate::node::NodeId;

/// State of an on/off surface toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    On,
    #[default]
    Off,
}

impl Toggle {
    pub fn flip(self) -> Self {
        match self {
            Toggle::On => Toggle::Off,
            Toggle::Off => Toggle::On,
        }
    }

    pub fn is_on(self) -> bool {
        self == Toggle::On
    }
}

/// Copied content: the fragment and its serialized form for the system
/// clipboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Clipboard {
    pub fragment: Fragment,
    pub text: String,
}

impl Clipboard {
    pub fn new(fragment: Fragment) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(&fragment)?;
        Ok(Self { fragment, text })
    }

    /// Parse clipboard text produced by [`Clipboard::new`].
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        let fragment = serde_json::from_str(text)?;
        Ok(Self {
            fragment,
            text: text.to_string(),
        })
    }
}

/// Request for the host to rasterize part of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCopyRequest {
    pub bounds: Rect,
    pub ids: Vec<NodeId>,
}

/// A short message shown next to the local cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorChat {
    pub txt: String,
    /// Milliseconds since the chat was last updated, relative to when the
    /// state was sent.
    pub ts: u64,
    #[serde(skip)]
    pub updated: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceState {
    pub ruler: Toggle,
    pub pixel_grid: Toggle,
    pub clipboard: Option<Clipboard>,
    pub cursor_chat: Option<CursorChat>,
    /// Remote cursor being followed.
    pub following: Option<String>,
}

impl SurfaceState {
    pub fn toggle_ruler(&mut self) -> Toggle {
        self.ruler = self.ruler.flip();
        self.ruler
    }

    pub fn toggle_pixel_grid(&mut self) -> Toggle {
        self.pixel_grid = self.pixel_grid.flip();
        self.pixel_grid
    }

    pub fn open_cursor_chat(&mut self, now: Instant) {
        if self.cursor_chat.is_none() {
            self.cursor_chat = Some(CursorChat {
                txt: String::new(),
                ts: 0,
                updated: Some(now),
            });
        }
    }

    pub fn update_cursor_chat(&mut self, txt: impl Into<String>, now: Instant) {
        self.cursor_chat = Some(CursorChat {
            txt: txt.into(),
            ts: 0,
            updated: Some(now),
        });
    }

    pub fn close_cursor_chat(&mut self) {
        self.cursor_chat = None;
    }

    /// Close a chat that has not been updated for `ttl`. Returns true when
    /// the chat expired.
    pub fn expire_cursor_chat(&mut self, now: Instant, ttl: Duration) -> bool {
        let expired = self
            .cursor_chat
            .as_ref()
            .and_then(|c| c.updated)
            .is_some_and(|t| now.saturating_duration_since(t) >= ttl);
        if expired {
            self.cursor_chat = None;
        }
        expired
    }

    pub fn follow(&mut self, cursor_id: impl Into<String>) {
        self.following = Some(cursor_id.into());
    }

    pub fn unfollow(&mut self) -> bool {
        self.following.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{BoxData, Node, NodeKind};

    #[test]
    fn test_toggles_report_new_state() {
        let mut surface = SurfaceState::default();
        assert_eq!(surface.toggle_ruler(), Toggle::On);
        assert_eq!(surface.toggle_ruler(), Toggle::Off);
        assert_eq!(surface.toggle_pixel_grid(), Toggle::On);
        assert_eq!(serde_json::to_string(&Toggle::On).unwrap(), "\"on\"");
    }

    #[test]
    fn test_clipboard_text_roundtrip() {
        let fragment = Fragment::single(Node::new("a", NodeKind::Rectangle(BoxData::new(1.0, 2.0))));
        let clip = Clipboard::new(fragment.clone()).unwrap();
        assert_eq!(Clipboard::from_text(&clip.text).unwrap().fragment, fragment);
    }

    #[test]
    fn test_cursor_chat_expires() {
        let mut surface = SurfaceState::default();
        let t0 = Instant::now();
        surface.update_cursor_chat("hi", t0);
        assert!(!surface.expire_cursor_chat(t0 + Duration::from_secs(1), Duration::from_secs(5)));
        assert!(surface.expire_cursor_chat(t0 + Duration::from_secs(6), Duration::from_secs(5)));
        assert!(surface.cursor_chat.is_none());
    }

    #[test]
    fn test_follow() {
        let mut surface = SurfaceState::default();
        surface.follow("peer-2");
        assert_eq!(surface.following.as_deref(), Some("peer-2"));
        assert!(surface.unfollow());
        assert!(!surface.unfollow());
    }
}
