//! Document model: a flat node arena organised into scenes.
//!
//! ```text
//! Document
//! ├── scenes_ref: [scene_id, ...]            ordered scenes
//! ├── links: { scene_id: [root_id, ...] }    top-level nodes of each scene
//! └── nodes: { id: Node }                    every node, stored exactly once
//! ```
//!
//! Nested nodes reference their children by id (`Node::children`). A derived
//! parent index gives constant-time parent lookup and is rebuilt whenever a
//! document is deserialized.

use std::collections::{BTreeMap, HashMap, HashSet};

use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CommandError;
use crate::math::{self, Transform};
use crate::node::{ChildrenConstraint, Node, NodeId, NodeKind, SceneData};

/// Binary assets (images) keyed by content hash.
pub type Assets = BTreeMap<String, Vec<u8>>;

/// Stable 64-bit FNV-1a content hash, as 16 hex digits.
pub fn asset_hash(bytes: &[u8]) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME));
    format!("{hash:016x}")
}

/// Monotonic id allocator producing `"{actor}-{n}"` ids.
///
/// Ids are never handed out twice for the lifetime of a document, even after
/// the node that carried one is deleted.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    actor: String,
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new("0")
    }
}

impl IdAllocator {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            next: 1,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(format!("{}-{}", self.actor, self.next));
        self.next += 1;
        id
    }

    /// Move the counter past `id` if it was minted by this actor.
    pub fn observe(&mut self, id: &NodeId) {
        let counter = id
            .as_str()
            .strip_prefix(self.actor.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(n) = counter {
            self.next = self.next.max(n + 1);
        }
    }
}

/// A detached forest of nodes, used for insertion, clipboard and undo.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Fragment {
    pub roots: Vec<NodeId>,
    pub nodes: BTreeMap<NodeId, Node>,
}

impl Fragment {
    pub fn single(node: Node) -> Self {
        let id = node.id.clone();
        Self {
            roots: vec![id.clone()],
            nodes: BTreeMap::from([(id, node)]),
        }
    }

    pub fn from_nodes(roots: Vec<NodeId>, nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            roots,
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Check that the fragment is a forest: every node reachable from exactly
    /// one root, every referenced child present, no nested scenes.
    pub fn check(&self) -> Result<(), CommandError> {
        if self.roots.is_empty() {
            return Err(CommandError::precondition("fragment has no roots"));
        }
        let mut seen = HashSet::new();
        let mut stack: Vec<&NodeId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            let node = self.nodes.get(id).ok_or_else(|| {
                CommandError::precondition(format!("fragment references missing node {id}"))
            })?;
            if node.is_scene() {
                return Err(CommandError::invalid_parent("scenes cannot be nested"));
            }
            if !seen.insert(id) {
                return Err(CommandError::precondition(format!(
                    "node {id} appears twice in fragment"
                )));
            }
            stack.extend(node.children.iter().rev());
        }
        if seen.len() != self.nodes.len() {
            return Err(CommandError::precondition("fragment has unreachable nodes"));
        }
        Ok(())
    }

    /// Copy of the fragment with every id replaced by a fresh one.
    pub fn rekey(&self, ids: &mut IdAllocator) -> Fragment {
        let map: HashMap<&NodeId, NodeId> = self.nodes.keys().map(|id| (id, ids.next_id())).collect();
        let remap = |id: &NodeId| map.get(id).cloned().unwrap_or_else(|| id.clone());
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                let mut node = node.clone();
                node.id = remap(&node.id);
                node.children = node.children.iter().map(remap).collect();
                (node.id.clone(), node)
            })
            .collect();
        Fragment {
            roots: self.roots.iter().map(remap).collect(),
            nodes,
        }
    }

    /// Move every root by `delta` in parent space.
    pub fn translate_roots(&mut self, delta: Vec2) {
        for id in &self.roots {
            if let Some(node) = self.nodes.get_mut(id) {
                node.relative_transform = node.relative_transform.translated(delta);
            }
        }
    }
}

fn sorted_map<S: Serializer, V: Serialize>(
    map: &HashMap<NodeId, V>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let sorted: BTreeMap<&NodeId, &V> = map.iter().collect();
    sorted.serialize(serializer)
}

#[derive(Deserialize)]
struct DocumentRepr {
    #[serde(default)]
    scenes_ref: Vec<NodeId>,
    #[serde(default)]
    links: HashMap<NodeId, Vec<NodeId>>,
    #[serde(default)]
    nodes: HashMap<NodeId, Node>,
}

impl TryFrom<DocumentRepr> for Document {
    type Error = CommandError;

    fn try_from(repr: DocumentRepr) -> Result<Self, Self::Error> {
        Document::from_parts(repr.scenes_ref, repr.links, repr.nodes)
    }
}

/// The document: scenes, their node trees and referenced assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "DocumentRepr")]
pub struct Document {
    scenes_ref: Vec<NodeId>,
    #[serde(serialize_with = "sorted_map")]
    links: HashMap<NodeId, Vec<NodeId>>,
    #[serde(serialize_with = "sorted_map")]
    nodes: HashMap<NodeId, Node>,
    #[serde(skip)]
    assets: Assets,
    #[serde(skip)]
    parents: HashMap<NodeId, NodeId>,
    #[serde(skip)]
    ids: IdAllocator,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural equality. The parent index and id allocator are derived state
/// and do not take part.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.scenes_ref == other.scenes_ref
            && self.links == other.links
            && self.nodes == other.nodes
            && self.assets == other.assets
    }
}

impl Document {
    /// An empty document with no scenes.
    pub fn new() -> Self {
        Self {
            scenes_ref: Vec::new(),
            links: HashMap::new(),
            nodes: HashMap::new(),
            assets: Assets::new(),
            parents: HashMap::new(),
            ids: IdAllocator::default(),
        }
    }

    /// A document with a single empty scene named `main`.
    pub fn with_default_scene() -> Self {
        let mut doc = Self::new();
        let id = doc.next_id();
        let scene = Node::new(id, NodeKind::Scene(SceneData::default())).with_name("main");
        // A fresh document always accepts its first scene.
        let _ = doc.add_scene(scene, None);
        doc
    }

    /// Build a document from its serialized parts, validating every tree
    /// invariant and rebuilding the parent index.
    pub fn from_parts(
        mut scenes_ref: Vec<NodeId>,
        mut links: HashMap<NodeId, Vec<NodeId>>,
        nodes: HashMap<NodeId, Node>,
    ) -> Result<Self, CommandError> {
        for (key, node) in &nodes {
            if key != &node.id {
                return Err(CommandError::precondition(format!(
                    "node stored under {key} has id {}",
                    node.id
                )));
            }
        }
        if scenes_ref.is_empty() {
            scenes_ref = nodes.values().filter(|n| n.is_scene()).map(|n| n.id.clone()).collect();
            scenes_ref.sort();
        }
        for scene in &scenes_ref {
            links.entry(scene.clone()).or_default();
        }
        let mut doc = Self {
            scenes_ref,
            links,
            nodes,
            assets: Assets::new(),
            parents: HashMap::new(),
            ids: IdAllocator::default(),
        };
        doc.validate()?;
        doc.rebuild_index();
        Ok(doc)
    }

    fn rebuild_index(&mut self) {
        self.parents.clear();
        for (scene, roots) in &self.links {
            for root in roots {
                self.parents.insert(root.clone(), scene.clone());
            }
        }
        for node in self.nodes.values() {
            for child in &node.children {
                self.parents.insert(child.clone(), node.id.clone());
            }
        }
        let mut ids = IdAllocator::new(self.ids.actor().to_string());
        for id in self.nodes.keys() {
            ids.observe(id);
        }
        ids.next = ids.next.max(self.ids.next);
        self.ids = ids;
    }

    // --- Id allocation ---

    pub fn next_id(&mut self) -> NodeId {
        self.ids.next_id()
    }

    pub fn id_allocator_mut(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    /// Switch the id actor (e.g. to the collaboration peer id) and move its
    /// counter past every id already present.
    pub fn set_id_actor(&mut self, actor: impl Into<String>) {
        let mut ids = IdAllocator::new(actor);
        for id in self.nodes.keys() {
            ids.observe(id);
        }
        self.ids = ids;
    }

    // --- Queries ---

    pub fn scenes_ref(&self) -> &[NodeId] {
        &self.scenes_ref
    }

    pub fn links(&self) -> &HashMap<NodeId, Vec<NodeId>> {
        &self.links
    }

    pub fn nodes(&self) -> &HashMap<NodeId, Node> {
        &self.nodes
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Like [`get_node`](Self::get_node) but reports a missing node as
    /// `TargetNotFound`.
    pub fn node(&self, id: &NodeId) -> Result<&Node, CommandError> {
        self.nodes
            .get(id)
            .ok_or_else(|| CommandError::TargetNotFound(id.clone()))
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node, CommandError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CommandError::TargetNotFound(id.clone()))
    }

    pub fn first_scene(&self) -> Option<&NodeId> {
        self.scenes_ref.first()
    }

    pub fn is_scene(&self, id: &NodeId) -> bool {
        self.nodes.get(id).is_some_and(Node::is_scene)
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    /// Ordered children of `id`. For a scene these are its root nodes.
    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        if let Some(roots) = self.links.get(id) {
            return roots;
        }
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn index_in_parent(&self, id: &NodeId) -> Option<usize> {
        let parent = self.parents.get(id)?;
        self.children_of(parent).iter().position(|c| c == id)
    }

    /// Ancestors from the direct parent up to and including the scene.
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parents.get(id);
        while let Some(parent) = current {
            out.push(parent.clone());
            current = self.parents.get(parent);
        }
        out
    }

    /// Whether `ancestor` is `id` itself or one of its ancestors.
    pub fn is_same_or_ancestor(&self, ancestor: &NodeId, id: &NodeId) -> bool {
        ancestor == id || self.ancestors(id).iter().any(|a| a == ancestor)
    }

    /// Descendants of `id` in pre-order, excluding `id`.
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeId> = self.children_of(id).iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next.clone());
            stack.extend(self.children_of(next).iter().rev());
        }
        out
    }

    pub fn scene_of(&self, id: &NodeId) -> Option<NodeId> {
        if self.is_scene(id) {
            return Some(id.clone());
        }
        self.ancestors(id).into_iter().last().filter(|s| self.is_scene(s))
    }

    /// Transform from node-local space to scene space.
    pub fn world_transform(&self, id: &NodeId) -> Transform {
        let mut chain = vec![id.clone()];
        chain.extend(self.ancestors(id));
        chain
            .iter()
            .rev()
            .filter_map(|n| self.nodes.get(n))
            .filter(|n| !n.is_scene())
            .fold(Transform::IDENTITY, |acc, n| acc.compose(&n.relative_transform))
    }

    /// Scene-space bounds of a node. Nodes without intrinsic bounds use the
    /// union of their children.
    pub fn bounds_of(&self, id: &NodeId) -> Option<Rect> {
        let node = self.nodes.get(id)?;
        match node.kind.local_bounds() {
            Some(local) => Some(self.world_transform(id).0.transform_rect_bbox(local)),
            None => math::union_all(self.children_of(id).iter().filter_map(|c| self.bounds_of(c))),
        }
    }

    pub fn bounds_of_all<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Option<Rect> {
        math::union_all(ids.into_iter().filter_map(|id| self.bounds_of(id)))
    }

    /// Bounds of everything in a scene, `None` when the scene is empty.
    pub fn scene_bounds(&self, scene: &NodeId) -> Option<Rect> {
        self.bounds_of_all(self.children_of(scene))
    }

    /// Visible nodes under `point`, topmost first.
    pub fn nodes_at_point(&self, scene: &NodeId, point: Point, tolerance: f64) -> Vec<NodeId> {
        let mut hits: Vec<NodeId> = self
            .descendants(scene)
            .into_iter()
            .filter(|id| {
                self.nodes.get(id).is_some_and(|n| {
                    n.visible && n.kind.local_bounds().is_some()
                }) && self
                    .bounds_of(id)
                    .is_some_and(|b| math::hit_rect(b, point, tolerance))
            })
            .collect();
        hits.reverse();
        hits
    }

    /// Top-level nodes of `scene` whose bounds intersect `rect`.
    pub fn nodes_in_rect(&self, scene: &NodeId, rect: Rect) -> Vec<NodeId> {
        self.children_of(scene)
            .iter()
            .filter(|id| self.nodes.get(*id).is_some_and(|n| n.visible))
            .filter(|id| self.bounds_of(id).is_some_and(|b| math::rect_intersects(rect, b)))
            .cloned()
            .collect()
    }

    /// Copy the subtrees rooted at `ids` into a fragment.
    pub fn extract_fragment(&self, ids: &[NodeId]) -> Result<Fragment, CommandError> {
        let mut fragment = Fragment::default();
        for id in ids {
            let node = self.node(id)?;
            if node.is_scene() {
                return Err(CommandError::precondition("a scene cannot be copied as a fragment"));
            }
            if fragment.nodes.contains_key(id) {
                continue;
            }
            fragment.roots.push(id.clone());
            fragment.nodes.insert(id.clone(), node.clone());
            for d in self.descendants(id) {
                if let Some(n) = self.nodes.get(&d) {
                    fragment.nodes.insert(d, n.clone());
                }
            }
        }
        // A root that is also a descendant of another root is already copied.
        let roots = fragment.roots.clone();
        fragment
            .roots
            .retain(|r| !roots.iter().any(|o| o != r && self.is_same_or_ancestor(o, r)));
        Ok(fragment)
    }

    /// Check every tree invariant: scenes exist, every node has exactly one
    /// parent reachable from a scene, no cycles, no dangling ids.
    pub fn validate(&self) -> Result<(), CommandError> {
        let mut seen: HashSet<&NodeId> = HashSet::new();
        for scene in &self.scenes_ref {
            let node = self.node(scene)?;
            if !node.is_scene() {
                return Err(CommandError::precondition(format!("{scene} is not a scene")));
            }
            if !seen.insert(scene) {
                return Err(CommandError::precondition(format!("scene {scene} listed twice")));
            }
        }
        for key in self.links.keys() {
            if !self.scenes_ref.contains(key) {
                return Err(CommandError::precondition(format!("links reference unknown scene {key}")));
            }
        }
        for scene in &self.scenes_ref {
            let mut stack: Vec<&NodeId> = self.links.get(scene).map(|r| r.iter().collect()).unwrap_or_default();
            while let Some(id) = stack.pop() {
                let node = self.node(id)?;
                if node.is_scene() {
                    return Err(CommandError::invalid_parent(format!("scene {id} nested in {scene}")));
                }
                if !seen.insert(id) {
                    return Err(CommandError::precondition(format!("node {id} has more than one parent")));
                }
                if !node.children.is_empty() && !node.kind.accepts_children() {
                    return Err(CommandError::invalid_parent(format!(
                        "{} node {id} cannot hold children",
                        node.kind.type_name()
                    )));
                }
                stack.extend(node.children.iter());
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(CommandError::precondition("document has unreachable nodes"));
        }
        Ok(())
    }

    // --- Assets ---

    /// Store asset bytes and return their content hash.
    pub fn add_asset(&mut self, bytes: Vec<u8>) -> String {
        let hash = asset_hash(&bytes);
        self.assets.insert(hash.clone(), bytes);
        hash
    }

    pub(crate) fn set_assets(&mut self, assets: Assets) {
        self.assets = assets;
    }

    // --- Insertion ---

    /// Insert a copy of `fragment` under `target` (default: the first scene)
    /// at `index` (default: the end). Every node gets a fresh id; the new
    /// root ids are returned.
    pub fn insert(
        &mut self,
        fragment: &Fragment,
        target: Option<&NodeId>,
        index: Option<usize>,
    ) -> Result<Vec<NodeId>, CommandError> {
        fragment.check()?;
        let parent = self.resolve_parent(target)?;
        self.check_parent(&parent, fragment.roots.len(), None)?;
        let fresh = fragment.rekey(&mut self.ids);
        let roots = fresh.roots.clone();
        self.attach(fresh, &parent, index)?;
        Ok(roots)
    }

    pub(crate) fn resolve_parent(&self, target: Option<&NodeId>) -> Result<NodeId, CommandError> {
        match target {
            Some(id) => Ok(id.clone()),
            None => self
                .first_scene()
                .cloned()
                .ok_or_else(|| CommandError::invalid_parent("document has no scene")),
        }
    }

    /// Check that `parent` can take `incoming` more children. `moving` is a
    /// node that may already be among them (reordering within a parent).
    pub(crate) fn check_parent(
        &self,
        parent: &NodeId,
        incoming: usize,
        moving: Option<&NodeId>,
    ) -> Result<(), CommandError> {
        let node = self
            .nodes
            .get(parent)
            .ok_or_else(|| CommandError::invalid_parent(format!("parent {parent} does not exist")))?;
        if !node.kind.accepts_children() {
            return Err(CommandError::invalid_parent(format!(
                "{} node {parent} cannot hold children",
                node.kind.type_name()
            )));
        }
        if let NodeKind::Scene(scene) = &node.kind {
            if scene.constraints.children == ChildrenConstraint::Single {
                let existing = self
                    .children_of(parent)
                    .iter()
                    .filter(|c| Some(*c) != moving)
                    .count();
                if existing + incoming > 1 {
                    return Err(CommandError::precondition(format!(
                        "scene {parent} accepts a single child"
                    )));
                }
            }
        }
        Ok(())
    }

    fn children_list_mut(&mut self, parent: &NodeId) -> Option<&mut Vec<NodeId>> {
        if self.links.contains_key(parent) {
            return self.links.get_mut(parent);
        }
        self.nodes.get_mut(parent).map(|n| &mut n.children)
    }

    /// Attach a fragment with its ids as-is. Used by inverses, so the restored
    /// nodes get back exactly the ids they had.
    pub(crate) fn attach(
        &mut self,
        fragment: Fragment,
        parent: &NodeId,
        index: Option<usize>,
    ) -> Result<(), CommandError> {
        fragment.check()?;
        if let Some(taken) = fragment.nodes.keys().find(|id| self.nodes.contains_key(*id)) {
            return Err(CommandError::precondition(format!("node id {taken} already in use")));
        }
        self.check_parent(parent, fragment.roots.len(), None)?;

        for node in fragment.nodes.values() {
            self.ids.observe(&node.id);
            for child in &node.children {
                self.parents.insert(child.clone(), node.id.clone());
            }
        }
        for root in &fragment.roots {
            self.parents.insert(root.clone(), parent.clone());
        }
        self.nodes.extend(fragment.nodes);
        if let Some(list) = self.children_list_mut(parent) {
            let at = index.unwrap_or(list.len()).min(list.len());
            for (offset, root) in fragment.roots.into_iter().enumerate() {
                list.insert(at + offset, root);
            }
        }
        Ok(())
    }

    /// Remove the subtree rooted at `id`. Returns it as a fragment together
    /// with the parent and index it was detached from.
    pub(crate) fn detach(&mut self, id: &NodeId) -> Result<(Fragment, NodeId, usize), CommandError> {
        let node = self.node(id)?;
        if node.is_scene() {
            return Err(CommandError::precondition("scenes are removed with RemoveScene"));
        }
        let parent = self
            .parents
            .get(id)
            .cloned()
            .ok_or_else(|| CommandError::precondition(format!("node {id} has no parent")))?;
        let index = self.index_in_parent(id).unwrap_or(0);
        let mut subtree = vec![id.clone()];
        subtree.extend(self.descendants(id));

        if let Some(list) = self.children_list_mut(&parent) {
            list.retain(|c| c != id);
        }
        let mut fragment = Fragment {
            roots: vec![id.clone()],
            nodes: BTreeMap::new(),
        };
        for n in subtree {
            self.parents.remove(&n);
            if let Some(node) = self.nodes.remove(&n) {
                fragment.nodes.insert(n, node);
            }
        }
        Ok((fragment, parent, index))
    }

    /// Move `id` under `parent` at `index`, keeping its subtree intact.
    /// Returns the previous parent and index.
    pub(crate) fn reparent(
        &mut self,
        id: &NodeId,
        parent: &NodeId,
        index: Option<usize>,
    ) -> Result<(NodeId, usize), CommandError> {
        let node = self.node(id)?;
        if node.is_scene() {
            return Err(CommandError::invalid_parent("a scene cannot be moved into a parent"));
        }
        if self.is_same_or_ancestor(id, parent) {
            return Err(CommandError::invalid_parent(format!(
                "moving {id} under {parent} would create a cycle"
            )));
        }
        self.check_parent(parent, 1, Some(id))?;
        let old_parent = self
            .parents
            .get(id)
            .cloned()
            .ok_or_else(|| CommandError::precondition(format!("node {id} has no parent")))?;
        let old_index = self.index_in_parent(id).unwrap_or(0);

        if let Some(list) = self.children_list_mut(&old_parent) {
            list.retain(|c| c != id);
        }
        if let Some(list) = self.children_list_mut(parent) {
            let at = index.unwrap_or(list.len()).min(list.len());
            list.insert(at, id.clone());
        }
        self.parents.insert(id.clone(), parent.clone());
        Ok((old_parent, old_index))
    }

    // --- Scenes ---

    pub(crate) fn add_scene(&mut self, scene: Node, index: Option<usize>) -> Result<(), CommandError> {
        if !scene.is_scene() {
            return Err(CommandError::precondition("not a scene node"));
        }
        if self.nodes.contains_key(&scene.id) {
            return Err(CommandError::precondition(format!("node id {} already in use", scene.id)));
        }
        let at = index.unwrap_or(self.scenes_ref.len()).min(self.scenes_ref.len());
        self.ids.observe(&scene.id);
        self.scenes_ref.insert(at, scene.id.clone());
        self.links.insert(scene.id.clone(), Vec::new());
        self.nodes.insert(scene.id.clone(), scene);
        Ok(())
    }

    /// Remove a scene with all of its content. Returns the scene node, its
    /// content (if any) and its position in `scenes_ref`.
    pub(crate) fn remove_scene(
        &mut self,
        id: &NodeId,
    ) -> Result<(Node, Option<Fragment>, usize), CommandError> {
        if !self.is_scene(id) {
            return Err(CommandError::TargetNotFound(id.clone()));
        }
        let index = self.scenes_ref.iter().position(|s| s == id).unwrap_or(0);
        let roots = self.children_of(id).to_vec();
        let mut content = Fragment::default();
        for root in &roots {
            let (fragment, _, _) = self.detach(root)?;
            content.nodes.extend(fragment.nodes);
        }
        content.roots = roots;
        self.links.remove(id);
        self.scenes_ref.retain(|s| s != id);
        let scene = self
            .nodes
            .remove(id)
            .ok_or_else(|| CommandError::TargetNotFound(id.clone()))?;
        let content = (!content.is_empty()).then_some(content);
        Ok((scene, content, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{BoxData, SceneConstraints};

    fn rect(id: &str, x: f64, y: f64) -> Node {
        Node::new(id, NodeKind::Rectangle(BoxData::new(10.0, 10.0)))
            .with_transform(Transform::translate(Vec2::new(x, y)))
    }

    fn doc_with_scene() -> (Document, NodeId) {
        let doc = Document::with_default_scene();
        let scene = doc.first_scene().cloned().unwrap();
        (doc, scene)
    }

    #[test]
    fn test_default_scene() {
        let (doc, scene) = doc_with_scene();
        assert_eq!(doc.scenes_ref(), &[scene.clone()]);
        assert!(doc.children_of(&scene).is_empty());
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_insert_rekeys_and_attaches() {
        let (mut doc, scene) = doc_with_scene();
        let ids = doc.insert(&Fragment::single(rect("tmp", 0.0, 0.0)), None, None).unwrap();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0].as_str(), "tmp");
        assert_eq!(doc.parent_of(&ids[0]), Some(&scene));
        assert_eq!(doc.children_of(&scene), ids.as_slice());
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_insert_nonexistent_parent() {
        let (mut doc, _) = doc_with_scene();
        let result = doc.insert(&Fragment::single(rect("a", 0.0, 0.0)), Some(&NodeId::from("nope")), None);
        assert!(matches!(result, Err(CommandError::InvalidParent(_))));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_insert_into_leaf_rejected() {
        let (mut doc, _) = doc_with_scene();
        let ids = doc.insert(&Fragment::single(rect("a", 0.0, 0.0)), None, None).unwrap();
        let result = doc.insert(&Fragment::single(rect("b", 0.0, 0.0)), Some(&ids[0]), None);
        assert!(matches!(result, Err(CommandError::InvalidParent(_))));
    }

    #[test]
    fn test_fragment_with_cycle_rejected() {
        let a = Node::new("a", NodeKind::Group).with_children(vec![NodeId::from("b")]);
        let b = Node::new("b", NodeKind::Group).with_children(vec![NodeId::from("a")]);
        let fragment = Fragment::from_nodes(vec![NodeId::from("a")], [a, b]);
        assert!(matches!(fragment.check(), Err(CommandError::PreconditionFailed(_))));
    }

    #[test]
    fn test_fragment_missing_child_rejected() {
        let a = Node::new("a", NodeKind::Group).with_children(vec![NodeId::from("ghost")]);
        let fragment = Fragment::single(a);
        assert!(fragment.check().is_err());
    }

    #[test]
    fn test_single_scene_constraint() {
        let mut doc = Document::new();
        let scene = Node::new(
            "s",
            NodeKind::Scene(SceneData {
                constraints: SceneConstraints {
                    children: ChildrenConstraint::Single,
                },
                ..Default::default()
            }),
        );
        doc.add_scene(scene, None).unwrap();
        doc.insert(&Fragment::single(rect("a", 0.0, 0.0)), None, None).unwrap();
        let second = doc.insert(&Fragment::single(rect("b", 0.0, 0.0)), None, None);
        assert!(matches!(second, Err(CommandError::PreconditionFailed(_))));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let (mut doc, _) = doc_with_scene();
        let first = doc.insert(&Fragment::single(rect("a", 0.0, 0.0)), None, None).unwrap();
        doc.detach(&first[0]).unwrap();
        let second = doc.insert(&Fragment::single(rect("a", 0.0, 0.0)), None, None).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_reparent_rejects_cycle() {
        let (mut doc, _) = doc_with_scene();
        let group = Node::new("g", NodeKind::Group).with_children(vec![NodeId::from("r")]);
        let fragment = Fragment::from_nodes(vec![NodeId::from("g")], [group, rect("r", 0.0, 0.0)]);
        let scene = doc.first_scene().cloned().unwrap();
        doc.attach(fragment, &scene, None).unwrap();
        let g = NodeId::from("g");
        let result = doc.reparent(&g, &g, None);
        assert!(matches!(result, Err(CommandError::InvalidParent(_))));
        let result = doc.reparent(&g, &NodeId::from("r"), None);
        assert!(matches!(result, Err(CommandError::InvalidParent(_))));
    }

    #[test]
    fn test_detach_and_attach_restore() {
        let (mut doc, scene) = doc_with_scene();
        for id in ["a", "b", "c"] {
            doc.attach(Fragment::single(rect(id, 0.0, 0.0)), &scene, None).unwrap();
        }
        let before = doc.clone();
        let (fragment, parent, index) = doc.detach(&NodeId::from("b")).unwrap();
        assert_eq!(index, 1);
        assert_eq!(doc.children_of(&scene).len(), 2);
        doc.attach(fragment, &parent, Some(index)).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_world_transform_and_bounds() {
        let (mut doc, scene) = doc_with_scene();
        let group = Node::new("g", NodeKind::Group)
            .with_transform(Transform::translate(Vec2::new(100.0, 0.0)))
            .with_children(vec![NodeId::from("r")]);
        let fragment = Fragment::from_nodes(vec![NodeId::from("g")], [group, rect("r", 5.0, 5.0)]);
        doc.attach(fragment, &scene, None).unwrap();
        let bounds = doc.bounds_of(&NodeId::from("r")).unwrap();
        assert_eq!(bounds, Rect::new(105.0, 5.0, 115.0, 15.0));
        assert_eq!(doc.bounds_of(&NodeId::from("g")), Some(bounds));
        assert_eq!(doc.scene_bounds(&scene), Some(bounds));
    }

    #[test]
    fn test_nodes_at_point_topmost_first() {
        let (mut doc, scene) = doc_with_scene();
        doc.attach(Fragment::single(rect("below", 0.0, 0.0)), &scene, None).unwrap();
        doc.attach(Fragment::single(rect("above", 5.0, 5.0)), &scene, None).unwrap();
        let hits = doc.nodes_at_point(&scene, Point::new(7.0, 7.0), 0.0);
        assert_eq!(hits, vec![NodeId::from("above"), NodeId::from("below")]);
    }

    #[test]
    fn test_json_roundtrip_rebuilds_index() {
        let (mut doc, scene) = doc_with_scene();
        let ids = doc.insert(&Fragment::single(rect("a", 1.0, 2.0)), None, None).unwrap();
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.parent_of(&ids[0]), Some(&scene));
    }

    #[test]
    fn test_deserialize_rejects_two_parents() {
        let json = r#"{
            "scenes_ref": ["s"],
            "links": {"s": ["g", "r"]},
            "nodes": {
                "s": {"id": "s", "type": "scene"},
                "g": {"id": "g", "type": "group", "children": ["r"]},
                "r": {"id": "r", "type": "rectangle", "width": 1, "height": 1}
            }
        }"#;
        assert!(serde_json::from_str::<Document>(json).is_err());
    }

    #[test]
    fn test_extract_fragment_dedupes_nested_roots() {
        let (mut doc, scene) = doc_with_scene();
        let group = Node::new("g", NodeKind::Group).with_children(vec![NodeId::from("r")]);
        let fragment = Fragment::from_nodes(vec![NodeId::from("g")], [group, rect("r", 0.0, 0.0)]);
        doc.attach(fragment, &scene, None).unwrap();
        let extracted = doc
            .extract_fragment(&[NodeId::from("g"), NodeId::from("r")])
            .unwrap();
        assert_eq!(extracted.roots, vec![NodeId::from("g")]);
        assert_eq!(extracted.nodes.len(), 2);
        assert!(extracted.check().is_ok());
    }

    #[test]
    fn test_remove_scene_returns_content() {
        let (mut doc, scene) = doc_with_scene();
        doc.attach(Fragment::single(rect("a", 0.0, 0.0)), &scene, None).unwrap();
        let (node, content, index) = doc.remove_scene(&scene).unwrap();
        assert!(node.is_scene());
        assert_eq!(index, 0);
        assert_eq!(content.map(|c| c.roots), Some(vec![NodeId::from("a")]));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_asset_hash_stable() {
        assert_eq!(asset_hash(b""), "cbf29ce484222325");
        assert_eq!(asset_hash(b"a"), "af63dc4c8601ec8c");
    }
}
