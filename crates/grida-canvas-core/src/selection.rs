//! Node selection.

use crate::document::Document;
use crate::node::NodeId;

/// Ordered set of selected node ids, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<NodeId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.ids.contains(id)
    }

    /// Replace the selection. Duplicates are dropped, first occurrence wins.
    pub fn set(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.ids.clear();
        for id in ids {
            self.add(id);
        }
    }

    pub fn add(&mut self, id: NodeId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    /// Add `id` if absent, remove it otherwise.
    pub fn toggle(&mut self, id: NodeId) {
        match self.ids.iter().position(|i| *i == id) {
            Some(pos) => {
                self.ids.remove(pos);
            }
            None => self.ids.push(id),
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drop ids that no longer exist or no longer belong to `scene`. Returns
    /// true when anything was removed.
    pub fn retain_valid(&mut self, doc: &Document, scene: Option<&NodeId>) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| {
            doc.contains(id) && !doc.is_scene(id) && scene.is_none_or(|s| doc.scene_of(id).as_ref() == Some(s))
        });
        self.ids.len() != before
    }
}
