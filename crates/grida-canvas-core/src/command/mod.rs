//! Command engine.
//!
//! Every document mutation is a [`Command`] value. Applying one returns the
//! [`Patch`] it produced and the inverse command, computed from the state the
//! command actually saw. Commands are atomic: a failure leaves the document
//! untouched, including for composite commands, which roll back the steps
//! they already applied.

mod apply;
mod patch;

pub use apply::apply;
pub use patch::Patch;

use kurbo::Vec2;
use serde::{Deserialize, Serialize};

use crate::color::Rgba32F;
use crate::document::Fragment;
use crate::math::Transform;
use crate::node::{BooleanOperation, Node, NodeId, NodeKind, SceneConstraints};

/// A single node attribute, used by [`Command::SetProperty`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum Property {
    Name(String),
    Active(bool),
    Locked(bool),
    Visible(bool),
    Transform(Transform),
    /// Replace the kind payload. The variant must stay the same.
    Kind(NodeKind),
}

/// Parameters for a new scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub constraints: SceneConstraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Rgba32F>,
    /// Position in `scenes_ref`; appended when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

/// A mutation intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Insert a copy of `fragment` with fresh ids.
    Insert {
        fragment: Fragment,
        parent: Option<NodeId>,
        index: Option<usize>,
    },
    /// Attach `fragment` keeping its ids.
    Attach {
        fragment: Fragment,
        parent: NodeId,
        index: Option<usize>,
    },
    Remove {
        ids: Vec<NodeId>,
    },
    SetProperty {
        id: NodeId,
        property: Property,
    },
    Translate {
        ids: Vec<NodeId>,
        delta: Vec2,
    },
    /// Reparent or reorder a node.
    Move {
        id: NodeId,
        parent: NodeId,
        index: Option<usize>,
    },
    Duplicate {
        ids: Vec<NodeId>,
        offset: Vec2,
    },
    Group {
        ids: Vec<NodeId>,
    },
    Ungroup {
        id: NodeId,
    },
    Boolean {
        ids: Vec<NodeId>,
        op: BooleanOperation,
    },
    CreateScene {
        spec: SceneSpec,
    },
    /// Restore a removed scene with its content, keeping ids.
    AddScene {
        scene: Node,
        content: Option<Fragment>,
        index: usize,
    },
    RemoveScene {
        id: NodeId,
    },
    /// Several commands applied as one atomic unit.
    Batch {
        commands: Vec<Command>,
    },
}

impl Command {
    pub fn rename(id: NodeId, name: impl Into<String>) -> Self {
        Command::SetProperty {
            id,
            property: Property::Name(name.into()),
        }
    }

    pub fn set_transform(id: NodeId, transform: Transform) -> Self {
        Command::SetProperty {
            id,
            property: Property::Transform(transform),
        }
    }

    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Insert { .. } => "insert",
            Command::Attach { .. } => "attach",
            Command::Remove { .. } => "remove",
            Command::SetProperty { .. } => "set_property",
            Command::Translate { .. } => "translate",
            Command::Move { .. } => "move",
            Command::Duplicate { .. } => "duplicate",
            Command::Group { .. } => "group",
            Command::Ungroup { .. } => "ungroup",
            Command::Boolean { .. } => "boolean",
            Command::CreateScene { .. } => "create_scene",
            Command::AddScene { .. } => "add_scene",
            Command::RemoveScene { .. } => "remove_scene",
            Command::Batch { .. } => "batch",
        }
    }
}

/// Outcome of a successful [`apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub patch: Patch,
    /// Command that undoes this one when applied to the resulting document.
    pub inverse: Command,
    /// Ids of nodes or scenes created by the command, in order.
    pub created: Vec<NodeId>,
}
