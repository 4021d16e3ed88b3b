use std::collections::BTreeSet;

use crate::node::NodeId;

/// The set of records a command touched.
///
/// `updated` holds nodes whose record changed, including parents whose child
/// list changed; `removed` holds nodes that no longer exist. The two sets are
/// kept disjoint: the last event for an id wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub updated: BTreeSet<NodeId>,
    pub removed: BTreeSet<NodeId>,
    /// Whether `scenes_ref` changed.
    pub scenes_changed: bool,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty() && !self.scenes_changed
    }

    pub fn touch(&mut self, id: &NodeId) {
        self.removed.remove(id);
        self.updated.insert(id.clone());
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.updated.remove(id);
        self.removed.insert(id.clone());
    }

    /// Fold a later patch into this one.
    pub fn merge(&mut self, later: Patch) {
        for id in &later.removed {
            self.remove(id);
        }
        for id in &later.updated {
            self.touch(id);
        }
        self.scenes_changed |= later.scenes_changed;
    }

    /// Every id mentioned by the patch.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.updated.iter().chain(self.removed.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_wins() {
        let id = NodeId::from("a");
        let mut first = Patch::new();
        first.remove(&id);
        let mut later = Patch::new();
        later.touch(&id);
        first.merge(later);
        assert!(first.updated.contains(&id));
        assert!(!first.removed.contains(&id));
    }

    #[test]
    fn test_empty() {
        let mut patch = Patch::new();
        assert!(patch.is_empty());
        patch.scenes_changed = true;
        assert!(!patch.is_empty());
    }
}
