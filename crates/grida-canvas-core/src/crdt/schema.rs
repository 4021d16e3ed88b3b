//! Loro document schema and operations.

use std::collections::{HashMap, HashSet};

use loro::{ExportMode, LoroDoc, LoroMap, LoroResult, LoroValue, ValueOrContainer, VersionVector};

use super::convert::{CrdtNode, node_from_loro, node_to_loro};
use crate::command::Patch;
use crate::document::Document;
use crate::error::{CommandError, SyncError};
use crate::node::NodeId;

/// Key for the nodes map in the document.
pub const NODES_KEY: &str = "nodes";

/// A CRDT mirror of a [`Document`].
///
/// Every node is a map of independent last-writer-wins registers, so
/// concurrent edits to different attributes of one node both survive.
pub struct CrdtDocument {
    doc: LoroDoc,
}

impl CrdtDocument {
    /// Create a new empty CRDT document.
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Create an empty document with a fixed peer id.
    pub fn with_peer_id(peer_id: u64) -> LoroResult<Self> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)?;
        Ok(Self { doc })
    }

    /// Create a CRDT document from a snapshot.
    pub fn from_snapshot(bytes: &[u8], peer_id: Option<u64>) -> LoroResult<Self> {
        let doc = LoroDoc::new();
        if let Some(peer_id) = peer_id {
            doc.set_peer_id(peer_id)?;
        }
        doc.import(bytes)?;
        Ok(Self { doc })
    }

    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    fn nodes_map(&self) -> LoroMap {
        self.doc.get_map(NODES_KEY)
    }

    pub fn node_count(&self) -> usize {
        self.nodes_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    /// Write the whole document, removing records of nodes it no longer has.
    pub fn write_document(&mut self, doc: &Document) -> Result<(), SyncError> {
        let nodes = self.nodes_map();
        for id in doc.nodes().keys() {
            self.write_node(&nodes, doc, id)?;
        }
        for key in self.stored_ids() {
            if !doc.contains(&NodeId::from(key.as_str())) {
                nodes.delete(&key)?;
            }
        }
        self.doc.commit();
        Ok(())
    }

    /// Write the records a patch touched. Returns whether anything changed.
    pub fn write_patch(&mut self, doc: &Document, patch: &Patch) -> Result<bool, SyncError> {
        let before = self.version();
        let nodes = self.nodes_map();
        let mut touched: HashSet<&NodeId> = HashSet::new();
        for id in &patch.updated {
            if !doc.contains(id) {
                continue;
            }
            touched.insert(id);
            // A parent in the patch may have reordered children.
            touched.extend(doc.children_of(id));
        }
        if patch.scenes_changed {
            touched.extend(doc.scenes_ref());
        }
        for id in touched {
            self.write_node(&nodes, doc, id)?;
        }
        for id in patch.removed.iter().chain(&patch.updated) {
            if !doc.contains(id) && nodes.get(id.as_str()).is_some() {
                nodes.delete(id.as_str())?;
            }
        }
        self.doc.commit();
        Ok(self.version() != before)
    }

    /// Write the registers of one node that differ from what is stored.
    fn write_node(&self, nodes: &LoroMap, doc: &Document, id: &NodeId) -> Result<(), SyncError> {
        let Some(node) = doc.get_node(id) else {
            return Ok(());
        };
        let (parent, order) = if node.is_scene() {
            let index = doc.scenes_ref().iter().position(|s| s == id).unwrap_or(0);
            (None, index as f64)
        } else {
            (doc.parent_of(id), doc.index_in_parent(id).unwrap_or(0) as f64)
        };
        let record = nodes.get_or_create_container(id.as_str(), LoroMap::new())?;
        for (key, value) in node_to_loro(node, parent, order)? {
            let unchanged = matches!(record.get(key), Some(ValueOrContainer::Value(ref v)) if *v == value);
            if !unchanged {
                record.insert(key, value)?;
            }
        }
        Ok(())
    }

    fn stored_ids(&self) -> Vec<String> {
        match self.nodes_map().get_deep_value() {
            LoroValue::Map(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn stored_nodes(&self) -> HashMap<NodeId, CrdtNode> {
        let LoroValue::Map(map) = self.nodes_map().get_deep_value() else {
            return HashMap::new();
        };
        map.iter()
            .filter_map(|(id, value)| match value {
                LoroValue::Map(attrs) => node_from_loro(id, attrs),
                _ => None,
            })
            .map(|n| (n.node.id.clone(), n))
            .collect()
    }

    /// Rebuild a document from the CRDT state.
    ///
    /// Children are ordered by `(order, id)`. Nodes whose parent is gone or
    /// cannot hold children are dropped with their subtrees. Cycles from
    /// concurrent moves are broken by re-attaching the smallest id in the
    /// cycle to the first scene.
    pub fn materialize(&self) -> Result<Document, CommandError> {
        let mut stored = self.stored_nodes();

        let mut scenes: Vec<(f64, NodeId)> = stored
            .values()
            .filter(|n| n.node.is_scene())
            .map(|n| (n.order, n.node.id.clone()))
            .collect();
        scenes.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let scenes_ref: Vec<NodeId> = scenes.into_iter().map(|(_, id)| id).collect();

        break_cycles(&mut stored, scenes_ref.first());

        let mut siblings: HashMap<NodeId, Vec<(f64, NodeId)>> = HashMap::new();
        for n in stored.values() {
            if n.node.is_scene() {
                continue;
            }
            let Some(parent) = &n.parent else { continue };
            let accepts = stored.get(parent).is_some_and(|p| p.node.kind.accepts_children());
            if accepts {
                siblings
                    .entry(parent.clone())
                    .or_default()
                    .push((n.order, n.node.id.clone()));
            } else {
                log::debug!("dropping orphan {}", n.node.id);
            }
        }
        let mut children: HashMap<NodeId, Vec<NodeId>> = siblings
            .into_iter()
            .map(|(parent, mut list)| {
                list.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                (parent, list.into_iter().map(|(_, id)| id).collect())
            })
            .collect();

        // Keep only what is reachable from a scene.
        let mut links = HashMap::new();
        let mut nodes = HashMap::new();
        let mut stack: Vec<NodeId> = Vec::new();
        for scene in &scenes_ref {
            let roots = children.remove(scene).unwrap_or_default();
            stack.extend(roots.iter().cloned());
            links.insert(scene.clone(), roots);
            if let Some(n) = stored.remove(scene) {
                nodes.insert(scene.clone(), n.node);
            }
        }
        while let Some(id) = stack.pop() {
            let Some(mut n) = stored.remove(&id) else { continue };
            n.node.children = children.remove(&id).unwrap_or_default();
            stack.extend(n.node.children.iter().cloned());
            nodes.insert(id, n.node);
        }

        Document::from_parts(scenes_ref, links, nodes)
    }

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> Result<Vec<u8>, SyncError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| SyncError::Crdt(e.to_string()))
    }

    /// Export incremental updates since a version.
    pub fn export_updates(&self, since: &VersionVector) -> Result<Vec<u8>, SyncError> {
        self.doc
            .export(ExportMode::updates(since))
            .map_err(|e| SyncError::Crdt(e.to_string()))
    }

    /// Import updates from another document.
    pub fn import(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
        self.doc.import(bytes)?;
        Ok(())
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk every parent chain; a chain that revisits a node is a cycle. The
/// smallest id on it is moved to `fallback` (or dropped when there is no
/// scene).
fn break_cycles(stored: &mut HashMap<NodeId, CrdtNode>, fallback: Option<&NodeId>) {
    let mut ids: Vec<NodeId> = stored.keys().cloned().collect();
    ids.sort();
    for start in ids {
        let mut path: Vec<NodeId> = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if let Some(pos) = path.iter().position(|p| *p == id) {
                let cycle = &path[pos..];
                if let Some(smallest) = cycle.iter().min().cloned() {
                    log::debug!("breaking parent cycle at {smallest}");
                    match fallback {
                        Some(scene) => {
                            if let Some(n) = stored.get_mut(&smallest) {
                                n.parent = Some(scene.clone());
                            }
                        }
                        None => {
                            stored.remove(&smallest);
                        }
                    }
                }
                break;
            }
            let Some(n) = stored.get(&id) else { break };
            if n.node.is_scene() {
                break;
            }
            path.push(id);
            current = n.parent.clone();
        }
    }
}
