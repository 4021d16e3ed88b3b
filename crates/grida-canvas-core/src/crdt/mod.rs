//! CRDT integration using Loro for collaborative editing.
//!
//! This module mirrors the document tree into a Loro document so peers can
//! merge concurrent edits without a central authority.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! └── "nodes": LoroMap<NodeId, LoroMap> (one record per node and scene)
//! ```
//!
//! Each record is a LoroMap of last-writer-wins registers:
//! - "type": String (node kind, "scene" for scenes)
//! - "name", "active", "locked", "visible": common attributes
//! - "transform": List of six doubles (relative affine coefficients)
//! - "props": String (kind payload, JSON)
//! - "parent": String (parent id, empty for scenes)
//! - "order": Double (sibling position; scenes use it for `scenes_ref`)
//!
//! The tree is not stored as child lists. It is rebuilt from the parent and
//! order registers by [`CrdtDocument::materialize`].

mod convert;
mod schema;

pub use convert::{CrdtNode, node_from_loro, node_to_loro};
pub use schema::{CrdtDocument, NODES_KEY};

pub use loro::{ExportMode, VersionVector};
