//! Grida Canvas Core Library
//!
//! Headless document editing engine for the Grida canvas: the node tree,
//! commands with undo/redo, tools, camera, CRDT collaboration and the
//! `.grida` archive format. Rendering is left to the host.

pub mod camera;
pub mod collaboration;
pub mod color;
pub mod command;
pub mod config;
pub mod crdt;
pub mod document;
pub mod editor;
pub mod error;
pub mod history;
pub mod io;
pub mod loader;
pub mod math;
pub mod node;
pub mod presence;
pub mod selection;
pub mod storage;
pub mod surface;
pub mod sync;
pub mod tools;

pub use camera::{Camera, FitTarget, ScaleAnchor};
pub use collaboration::CollaborationManager;
pub use color::Rgba32F;
pub use command::{Command, CommandResult, Patch, Property, SceneSpec};
pub use config::EditorConfig;
pub use crdt::CrdtDocument;
pub use document::{Document, Fragment};
pub use editor::{Editor, EditorEvent, EditorState, SubscriptionId};
pub use error::{CommandError, EditorError, LoadError, SyncError};
pub use history::History;
pub use io::DocumentInit;
pub use loader::{DocumentLoader, LoadTicket};
pub use math::Transform;
pub use node::{Node, NodeId, NodeKind};
pub use presence::PresenceState;
pub use selection::Selection;
pub use sync::{ConnectionState, SyncEvent, Transport};
pub use tools::{ContentEditMode, ToolController, ToolMode};
