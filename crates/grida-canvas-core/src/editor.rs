//! The editor facade.
//!
//! [`Editor`] owns the document and every piece of editor state around it:
//! history, selection, tools, camera, surface toggles and the optional
//! collaboration session. All document mutations go through the command
//! engine, so every local change is undoable and mirrored to peers.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use kurbo::{Affine, Point, Rect, Size, Vec2};

use crate::camera::{Camera, FitTarget, ScaleAnchor};
use crate::collaboration::CollaborationManager;
use crate::color::Rgba32F;
use crate::command::{self, Command, CommandResult, Patch, Property, SceneSpec};
use crate::config::EditorConfig;
use crate::document::{Document, Fragment};
use crate::error::{CommandError, EditorError, SyncError};
use crate::history::History;
use crate::io::{self, DocumentInit};
use crate::loader::{DocumentLoader, LoadTicket};
use crate::math::{self, Transform};
use crate::node::{
    BooleanOperation, BoxData, ImageData, Node, NodeId, NodeKind, TextData, VariableWidthProfile,
    VectorData, VectorNetwork,
};
use crate::presence::ChatMessage;
use crate::selection::Selection;
use crate::storage::{self, Storage, StorageError};
use crate::surface::{Clipboard, ImageCopyRequest, SurfaceState, Toggle};
use crate::sync::{SyncEvent, Transport};
use crate::tools::{
    ContentEditCommit, DrawTool, InsertKind, StrokeTool, ToolController, ToolMode, ToolOutcome,
};

/// Screen-space pick tolerance in pixels.
pub const HIT_TOLERANCE: f64 = 4.0;

/// Half width given to strokes drawn with the brush outside bitmap editing.
pub const BRUSH_WIDTH: f64 = 2.0;

/// Id carried by freshly built nodes; insertion assigns the real one.
const PLACEHOLDER_ID: &str = "new";

const SHAPE_FILL: Rgba32F = Rgba32F::new(0.693, 0.693, 0.693, 1.0);

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    DocumentChanged { patch: Patch },
    SelectionChanged { ids: Vec<NodeId> },
    SceneChanged { scene: Option<NodeId> },
    ToolChanged { tool: ToolMode },
    ContentEditChanged,
    CameraChanged { transform: Affine },
    SurfaceChanged,
    /// The document was swapped wholesale.
    Reset { key: String },
    Sync(SyncEvent),
}

/// Handle returned by [`Editor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Listener = Box<dyn FnMut(&EditorEvent) + Send>;

/// Everything the host may read to render the editor.
#[derive(Debug)]
pub struct EditorState {
    document: Document,
    document_key: String,
    editable: bool,
    debug: bool,
    scene_id: Option<NodeId>,
    selection: Selection,
    tools: ToolController,
    camera: Camera,
    surface: SurfaceState,
    paint: Rgba32F,
}

impl EditorState {
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Identity of the loaded document; changes on every reset.
    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    pub fn editable(&self) -> bool {
        self.editable
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The scene being edited.
    pub fn scene_id(&self) -> Option<&NodeId> {
        self.scene_id.as_ref()
    }

    pub fn selection(&self) -> &[NodeId] {
        self.selection.ids()
    }

    pub fn tools(&self) -> &ToolController {
        &self.tools
    }

    pub fn tool(&self) -> ToolMode {
        self.tools.tool()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn surface(&self) -> &SurfaceState {
        &self.surface
    }

    /// Color used by fill tools.
    pub fn paint(&self) -> Rgba32F {
        self.paint
    }
}

/// Pointer state between `pointer_down` and `pointer_up`.
#[derive(Debug, Clone, Copy)]
struct PointerSession {
    last_screen: Point,
    start_world: Point,
    /// The gesture started on a selected node and moves the selection.
    moves_selection: bool,
    additive: bool,
}

fn new_document_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id actor for content created outside a collaboration session. Random so
/// that nodes two editors create before joining the same room never share ids.
fn local_id_actor() -> String {
    let mut actor = uuid::Uuid::new_v4().simple().to_string();
    actor.truncate(12);
    actor
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The ids a remote merge changed, expressed as a patch.
fn diff_documents(old: &Document, new: &Document) -> Patch {
    let mut patch = Patch::new();
    for (id, node) in new.nodes() {
        if old.get_node(id) != Some(node) {
            patch.touch(id);
        }
    }
    for id in old.nodes().keys() {
        if !new.contains(id) {
            patch.remove(id);
        }
    }
    for scene in new.scenes_ref() {
        if old.links().get(scene) != new.links().get(scene) {
            patch.touch(scene);
        }
    }
    patch.scenes_changed = old.scenes_ref() != new.scenes_ref();
    patch
}

/// Regular polygon or star outline inscribed in `size`, starting at the top.
fn star_points(size: Size, points: usize, inner_ratio: Option<f64>) -> Vec<Point> {
    let center = Point::new(size.width / 2.0, size.height / 2.0);
    let (rx, ry) = (size.width / 2.0, size.height / 2.0);
    let count = if inner_ratio.is_some() { points * 2 } else { points };
    (0..count)
        .map(|i| {
            let angle = -std::f64::consts::FRAC_PI_2 + i as f64 * std::f64::consts::TAU / count as f64;
            let scale = match inner_ratio {
                Some(ratio) if i % 2 == 1 => ratio,
                _ => 1.0,
            };
            Point::new(
                center.x + rx * scale * angle.cos(),
                center.y + ry * scale * angle.sin(),
            )
        })
        .collect()
}

/// A node for the insert tool, placed at `rect` in scene space.
fn insert_node_for(kind: InsertKind, rect: Rect) -> Node {
    let (w, h) = (rect.width(), rect.height());
    let node_kind = match kind {
        InsertKind::Text => NodeKind::Text(TextData {
            width: w,
            height: h,
            ..Default::default()
        }),
        InsertKind::Image => NodeKind::Image(ImageData {
            image_ref: String::new(),
            width: w,
            height: h,
        }),
        InsertKind::Container => NodeKind::Container(BoxData {
            fill: Some(Rgba32F::WHITE),
            ..BoxData::new(w, h)
        }),
        InsertKind::Rectangle => NodeKind::Rectangle(BoxData {
            fill: Some(SHAPE_FILL),
            ..BoxData::new(w, h)
        }),
        InsertKind::Ellipse => NodeKind::Ellipse(BoxData {
            fill: Some(SHAPE_FILL),
            ..BoxData::new(w, h)
        }),
        InsertKind::Polygon | InsertKind::Star => {
            let points = match kind {
                InsertKind::Star => star_points(rect.size(), 5, Some(0.5)),
                _ => star_points(rect.size(), 3, None),
            };
            NodeKind::Vector(VectorData {
                network: VectorNetwork::polygon(&points),
                fill: Some(SHAPE_FILL),
                ..Default::default()
            })
        }
    };
    let name = match kind {
        InsertKind::Polygon => "polygon",
        InsertKind::Star => "star",
        _ => node_kind.type_name(),
    };
    Node::new(NodeId::from(PLACEHOLDER_ID), node_kind)
        .with_name(name)
        .with_transform(Transform::translate(rect.origin().to_vec2()))
}

/// A vector node through `points` (scene space), positioned at their bounds.
fn polyline_node(points: &[Point], name: &str) -> Option<Node> {
    let origin = math::union_all(points.iter().map(|p| Rect::from_points(*p, *p)))?.origin();
    let local: Vec<Point> = points.iter().map(|p| *p - origin.to_vec2()).collect();
    let node = Node::new(
        NodeId::from(PLACEHOLDER_ID),
        NodeKind::Vector(VectorData {
            network: VectorNetwork::polyline(&local),
            ..Default::default()
        }),
    )
    .with_name(name)
    .with_transform(Transform::translate(origin.to_vec2()));
    Some(node)
}

/// The editing engine facade.
pub struct Editor {
    state: EditorState,
    config: EditorConfig,
    history: History,
    loader: DocumentLoader,
    collaboration: Option<CollaborationManager>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
    pointer: Option<PointerSession>,
}

impl Editor {
    pub fn new(init: DocumentInit, config: EditorConfig) -> Result<Self, EditorError> {
        config.validate()?;
        let mut document = init.document;
        document.set_id_actor(local_id_actor());
        let scene_id = document.first_scene().cloned();
        Ok(Self {
            state: EditorState {
                document,
                document_key: new_document_key(),
                editable: init.editable,
                debug: init.debug,
                scene_id,
                selection: Selection::new(),
                tools: ToolController::new(),
                camera: Camera::from_config(&config),
                surface: SurfaceState::default(),
                paint: Rgba32F::BLACK,
            },
            history: History::new(config.max_undo_history),
            loader: DocumentLoader::new(),
            collaboration: None,
            listeners: Vec::new(),
            next_subscription: 0,
            pointer: None,
            config,
        })
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn doc(&self) -> &Document {
        &self.state.document
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn collaboration(&self) -> Option<&CollaborationManager> {
        self.collaboration.as_ref()
    }

    // --- Subscriptions ---

    pub fn subscribe(&mut self, listener: impl FnMut(&EditorEvent) + Send + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    fn emit(&mut self, event: EditorEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }

    // --- Command plumbing ---

    fn ensure_editable(&self) -> Result<(), CommandError> {
        if self.state.editable {
            Ok(())
        } else {
            Err(CommandError::precondition("document is read-only"))
        }
    }

    /// Apply a command, record its inverse and publish the change.
    pub fn execute(&mut self, command: Command) -> Result<CommandResult, EditorError> {
        self.ensure_editable()?;
        let result = command::apply(&mut self.state.document, command)?;
        self.history.record(result.inverse.clone());
        self.after_change(&result.patch);
        Ok(result)
    }

    /// Bring derived state in line with the document after `patch`.
    fn after_change(&mut self, patch: &Patch) {
        if patch.is_empty() {
            return;
        }
        self.ensure_scene();
        if let Some(id) = self.state.tools.content_edit_mode().node_id() {
            if !self.state.document.contains(id) {
                log::debug!("content edit target {id} is gone");
                self.state.tools.discard_content_edit();
                self.emit(EditorEvent::ContentEditChanged);
            }
        }
        if self
            .state
            .selection
            .retain_valid(&self.state.document, self.state.scene_id.as_ref())
        {
            self.selection_changed();
        }
        if let Some(collaboration) = &mut self.collaboration {
            if let Err(e) = collaboration.propose(&self.state.document, patch) {
                log::warn!("failed to propose change: {e}");
            }
        }
        self.emit(EditorEvent::DocumentChanged {
            patch: patch.clone(),
        });
    }

    fn ensure_scene(&mut self) {
        let valid = self
            .state
            .scene_id
            .as_ref()
            .is_some_and(|s| self.state.document.is_scene(s));
        if !valid {
            self.state.scene_id = self.state.document.first_scene().cloned();
            self.emit(EditorEvent::SceneChanged {
                scene: self.state.scene_id.clone(),
            });
        }
    }

    fn set_selection(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        let before = self.state.selection.ids().to_vec();
        self.state.selection.set(ids);
        if self.state.selection.ids() != before.as_slice() {
            self.selection_changed();
        }
    }

    fn selection_changed(&mut self) {
        let ids = self.state.selection.ids().to_vec();
        if let Some(collaboration) = &mut self.collaboration {
            let selection = ids.clone();
            collaboration.update_presence(Instant::now(), |p| p.selection = selection);
        }
        self.emit(EditorEvent::SelectionChanged { ids });
    }

    fn selected(&self) -> Vec<NodeId> {
        self.state.selection.ids().to_vec()
    }

    // --- Commands ---

    /// Insert `node` into the active scene and select it. The node gets a
    /// fresh id.
    pub fn insert_node(&mut self, node: Node) -> Result<NodeId, EditorError> {
        let scene = self.state.scene_id.clone();
        self.insert_fragment(Fragment::single(node), scene)?
            .into_iter()
            .next()
            .ok_or_else(|| CommandError::precondition("nothing was inserted").into())
    }

    fn insert_fragment(
        &mut self,
        fragment: Fragment,
        parent: Option<NodeId>,
    ) -> Result<Vec<NodeId>, EditorError> {
        let result = self.execute(Command::Insert {
            fragment,
            parent,
            index: None,
        })?;
        self.set_selection(result.created.iter().cloned());
        Ok(result.created)
    }

    /// Duplicate `ids` (or the selection when empty) and select the copies.
    pub fn duplicate(&mut self, ids: &[NodeId]) -> Result<Vec<NodeId>, EditorError> {
        let ids = if ids.is_empty() { self.selected() } else { ids.to_vec() };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.execute(Command::Duplicate {
            ids,
            offset: self.config.duplicate_offset,
        })?;
        self.set_selection(result.created.iter().cloned());
        Ok(result.created)
    }

    pub fn delete(&mut self, ids: &[NodeId]) -> Result<(), EditorError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.execute(Command::Remove { ids: ids.to_vec() })?;
        Ok(())
    }

    pub fn rename(&mut self, id: &NodeId, name: impl Into<String>) -> Result<(), EditorError> {
        self.execute(Command::rename(id.clone(), name))?;
        Ok(())
    }

    pub fn set_property(&mut self, id: &NodeId, property: Property) -> Result<(), EditorError> {
        self.execute(Command::SetProperty {
            id: id.clone(),
            property,
        })?;
        Ok(())
    }

    pub fn translate(&mut self, ids: &[NodeId], delta: Vec2) -> Result<(), EditorError> {
        if ids.is_empty() || delta == Vec2::ZERO {
            return Ok(());
        }
        self.execute(Command::Translate {
            ids: ids.to_vec(),
            delta,
        })?;
        Ok(())
    }

    /// Reparent or reorder a node.
    pub fn move_node(
        &mut self,
        id: &NodeId,
        parent: &NodeId,
        index: Option<usize>,
    ) -> Result<(), EditorError> {
        self.execute(Command::Move {
            id: id.clone(),
            parent: parent.clone(),
            index,
        })?;
        Ok(())
    }

    /// Wrap `ids` in a new group and select it.
    pub fn group(&mut self, ids: &[NodeId]) -> Result<NodeId, EditorError> {
        let result = self.execute(Command::Group { ids: ids.to_vec() })?;
        self.select_first_created(result)
    }

    /// Dissolve a group or boolean, selecting its former children.
    pub fn ungroup(&mut self, id: &NodeId) -> Result<Vec<NodeId>, EditorError> {
        let children = self.state.document.children_of(id).to_vec();
        self.execute(Command::Ungroup { id: id.clone() })?;
        self.set_selection(children.iter().cloned());
        Ok(children)
    }

    pub fn boolean_op(&mut self, ids: &[NodeId], op: BooleanOperation) -> Result<NodeId, EditorError> {
        let result = self.execute(Command::Boolean {
            ids: ids.to_vec(),
            op,
        })?;
        self.select_first_created(result)
    }

    fn select_first_created(&mut self, result: CommandResult) -> Result<NodeId, EditorError> {
        let id = result
            .created
            .into_iter()
            .next()
            .ok_or_else(|| CommandError::precondition("command created no node"))?;
        self.set_selection([id.clone()]);
        Ok(id)
    }

    /// Import an SVG as a container of vector nodes in the active scene.
    pub fn create_node_from_svg(&mut self, svg: &str) -> Result<NodeId, EditorError> {
        let fragment = io::create_node_from_svg(svg)?;
        let scene = self.state.scene_id.clone();
        self.insert_fragment(fragment, scene)?
            .into_iter()
            .next()
            .ok_or_else(|| CommandError::precondition("nothing was inserted").into())
    }

    pub fn create_scene(&mut self, spec: SceneSpec) -> Result<NodeId, EditorError> {
        let result = self.execute(Command::CreateScene { spec })?;
        result
            .created
            .into_iter()
            .next()
            .ok_or_else(|| CommandError::precondition("no scene was created").into())
    }

    pub fn delete_scene(&mut self, id: &NodeId) -> Result<(), EditorError> {
        self.execute(Command::RemoveScene { id: id.clone() })?;
        Ok(())
    }

    /// Switch the active scene. Clears the selection and leaves content edit.
    pub fn load_scene(&mut self, id: &NodeId) -> Result<(), EditorError> {
        if !self.state.document.is_scene(id) {
            return Err(CommandError::TargetNotFound(id.clone()).into());
        }
        if self.state.scene_id.as_ref() == Some(id) {
            return Ok(());
        }
        self.state.tools.discard_content_edit();
        self.state.scene_id = Some(id.clone());
        self.set_selection([]);
        if let Some(collaboration) = &mut self.collaboration {
            let scene = id.clone();
            collaboration.update_presence(Instant::now(), |p| p.scene_id = Some(scene));
        }
        self.emit(EditorEvent::SceneChanged {
            scene: Some(id.clone()),
        });
        Ok(())
    }

    pub fn select(&mut self, ids: &[NodeId]) -> Result<(), EditorError> {
        for id in ids {
            if !self.state.document.contains(id) || self.state.document.is_scene(id) {
                return Err(CommandError::TargetNotFound(id.clone()).into());
            }
        }
        self.set_selection(ids.iter().cloned());
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.set_selection([]);
    }

    pub fn set_paint(&mut self, paint: Rgba32F) {
        self.state.paint = paint;
    }

    // --- History ---

    pub fn undo(&mut self) -> Result<bool, EditorError> {
        self.ensure_editable()?;
        match self.history.undo(&mut self.state.document)? {
            Some(patch) => {
                log::debug!("undo");
                self.after_change(&patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool, EditorError> {
        self.ensure_editable()?;
        match self.history.redo(&mut self.state.document)? {
            Some(patch) => {
                log::debug!("redo");
                self.after_change(&patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn begin_transaction(&mut self, label: impl Into<String>) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.history.begin_transaction(label)?;
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> bool {
        self.history.commit_transaction()
    }

    pub fn rollback_transaction(&mut self) -> Result<(), EditorError> {
        let patch = self.history.rollback_transaction(&mut self.state.document)?;
        self.after_change(&patch);
        Ok(())
    }

    // --- Reset and persistence ---

    /// Replace the document. History, selection and content edit are cleared
    /// and the document gets a new key, `key` or a fresh uuid.
    pub fn reset(&mut self, document: Document, key: Option<String>) -> String {
        let key = key.unwrap_or_else(new_document_key);
        log::info!("reset document ({} nodes) as {key}", document.len());
        self.state.document = document;
        self.state.document_key = key.clone();
        self.state.scene_id = self.state.document.first_scene().cloned();
        self.state.selection.clear();
        self.state.tools.reset();
        self.pointer = None;
        self.history.clear();
        match &mut self.collaboration {
            Some(collaboration) => {
                self.state
                    .document
                    .set_id_actor(collaboration.peer_id().to_string());
                if let Err(e) = collaboration.propose_document(&self.state.document) {
                    log::warn!("failed to propose reset document: {e}");
                }
            }
            None => self.state.document.set_id_actor(local_id_actor()),
        }
        self.emit(EditorEvent::Reset { key: key.clone() });
        key
    }

    /// Pack the document as a `.grida` archive. History is kept.
    pub fn archive(&self) -> Result<Vec<u8>, EditorError> {
        Ok(io::pack(&self.state.document)?)
    }

    pub async fn save(&self, storage: &dyn Storage, id: &str) -> Result<(), StorageError> {
        storage::save_document(storage, id, &self.state.document).await
    }

    pub fn loader(&self) -> &DocumentLoader {
        &self.loader
    }

    /// Start a load; any load still in flight is superseded.
    pub fn begin_load(&self) -> LoadTicket {
        self.loader.begin()
    }

    /// Complete a load. The document is replaced only when the ticket is
    /// current and the bytes unpack cleanly.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<u8>, StorageError>,
    ) -> Result<String, EditorError> {
        let document = self.loader.finish(ticket, result)?;
        Ok(self.reset(document, None))
    }

    // --- Camera ---

    fn camera_changed(&mut self) {
        let transform = self.state.camera.transform();
        self.emit(EditorEvent::CameraChanged { transform });
    }

    pub fn zoom_in(&mut self) {
        self.state.camera.zoom_in();
        self.camera_changed();
    }

    pub fn zoom_out(&mut self) {
        self.state.camera.zoom_out();
        self.camera_changed();
    }

    pub fn scale(&mut self, zoom: f64, anchor: ScaleAnchor) {
        self.state.camera.scale(zoom, anchor);
        self.camera_changed();
    }

    pub fn pan(&mut self, delta: Vec2) {
        self.state.camera.pan(delta);
        self.camera_changed();
    }

    pub fn set_camera_transform(&mut self, transform: Affine) {
        self.state.camera.set_transform(transform);
        self.camera_changed();
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.state.camera.set_viewport(viewport);
        self.camera_changed();
    }

    /// Frame `target`. Returns false when there was nothing to frame.
    pub fn fit(&mut self, target: FitTarget) -> bool {
        let doc = &self.state.document;
        let bounds = match &target {
            FitTarget::All => {
                let bounds = self.state.scene_id.as_ref().and_then(|s| doc.scene_bounds(s));
                if bounds.is_none() {
                    self.state.camera.reset();
                    self.camera_changed();
                    return true;
                }
                bounds
            }
            FitTarget::Selection => doc.bounds_of_all(self.state.selection.ids()),
            FitTarget::Node(id) => doc.bounds_of(id),
        };
        let Some(bounds) = bounds else {
            return false;
        };
        self.state.camera.fit_bounds(bounds);
        self.camera_changed();
        true
    }

    // --- Surface ---

    pub fn surface_set_tool(&mut self, tool: ToolMode) -> Result<(), EditorError> {
        let had_content = !self.state.tools.content_edit_mode().is_none();
        self.state.tools.set_tool(tool)?;
        self.pointer = None;
        if had_content && self.state.tools.content_edit_mode().is_none() {
            self.emit(EditorEvent::ContentEditChanged);
        }
        self.emit(EditorEvent::ToolChanged { tool });
        Ok(())
    }

    /// Switch tools until [`end_temporary_tool`](Self::end_temporary_tool),
    /// e.g. while space is held.
    pub fn begin_temporary_tool(&mut self, tool: ToolMode) -> Result<(), EditorError> {
        self.state.tools.push_temporary_tool(tool)?;
        self.pointer = None;
        self.emit(EditorEvent::ToolChanged { tool });
        Ok(())
    }

    pub fn end_temporary_tool(&mut self) {
        if self.state.tools.pop_temporary_tool() {
            self.pointer = None;
            let tool = self.state.tools.tool();
            self.emit(EditorEvent::ToolChanged { tool });
        }
    }

    pub fn surface_toggle_ruler(&mut self) -> Toggle {
        let state = self.state.surface.toggle_ruler();
        self.emit(EditorEvent::SurfaceChanged);
        state
    }

    pub fn surface_toggle_pixel_grid(&mut self) -> Toggle {
        let state = self.state.surface.toggle_pixel_grid();
        self.emit(EditorEvent::SurfaceChanged);
        state
    }

    /// Copy the selection. Returns the clipboard text for the system clipboard.
    pub fn a11y_copy(&mut self) -> Result<Option<String>, EditorError> {
        let ids = self.selected();
        if ids.is_empty() {
            return Ok(None);
        }
        let fragment = self.state.document.extract_fragment(&ids)?;
        let clipboard = Clipboard::new(fragment)
            .map_err(|e| CommandError::precondition(format!("cannot serialize selection: {e}")))?;
        let text = clipboard.text.clone();
        self.state.surface.clipboard = Some(clipboard);
        Ok(Some(text))
    }

    pub fn a11y_cut(&mut self) -> Result<Option<String>, EditorError> {
        self.ensure_editable()?;
        let text = self.a11y_copy()?;
        if text.is_some() {
            let ids = self.selected();
            self.delete(&ids)?;
        }
        Ok(text)
    }

    /// Paste the internal clipboard next to the selection (or into the active
    /// scene) and select the pasted nodes.
    pub fn a11y_paste(&mut self) -> Result<Vec<NodeId>, EditorError> {
        let Some(clipboard) = self.state.surface.clipboard.clone() else {
            return Ok(Vec::new());
        };
        self.paste_fragment(clipboard.fragment)
    }

    /// Paste text from the system clipboard.
    pub fn paste_text(&mut self, text: &str) -> Result<Vec<NodeId>, EditorError> {
        let clipboard = Clipboard::from_text(text)
            .map_err(|e| CommandError::precondition(format!("clipboard is not a fragment: {e}")))?;
        let fragment = clipboard.fragment.clone();
        self.state.surface.clipboard = Some(clipboard);
        self.paste_fragment(fragment)
    }

    fn paste_fragment(&mut self, fragment: Fragment) -> Result<Vec<NodeId>, EditorError> {
        let doc = &self.state.document;
        let parent = self
            .state
            .selection
            .ids()
            .first()
            .and_then(|id| doc.parent_of(id))
            .filter(|p| doc.get_node(p).is_some_and(|n| n.kind.accepts_children()))
            .cloned()
            .or_else(|| self.state.scene_id.clone());
        self.insert_fragment(fragment, parent)
    }

    /// Delete the selected vertices in vector edit, otherwise the selection.
    pub fn a11y_delete(&mut self) -> Result<(), EditorError> {
        self.ensure_editable()?;
        if self.state.tools.delete_selected_vertices() {
            self.emit(EditorEvent::ContentEditChanged);
            return Ok(());
        }
        let ids = self.selected();
        self.delete(&ids)
    }

    /// What the host should rasterize to copy the selection as an image.
    pub fn a11y_copy_as_image(&self) -> Option<ImageCopyRequest> {
        let ids = self.selected();
        let bounds = self.state.document.bounds_of_all(&ids)?;
        Some(ImageCopyRequest { bounds, ids })
    }

    /// Cancel the gesture in progress, else leave content edit, else clear
    /// the selection.
    pub fn escape(&mut self) {
        if self.state.tools.is_dragging() {
            self.state.tools.cancel();
            self.pointer = None;
        } else if !self.state.tools.content_edit_mode().is_none() {
            self.state.tools.discard_content_edit();
            self.emit(EditorEvent::ContentEditChanged);
        } else {
            self.clear_selection();
        }
    }

    pub fn open_cursor_chat(&mut self, now: Instant) {
        self.state.surface.open_cursor_chat(now);
        self.emit(EditorEvent::SurfaceChanged);
    }

    pub fn update_cursor_chat(&mut self, txt: impl Into<String>, now: Instant) {
        let txt = txt.into();
        self.state.surface.update_cursor_chat(txt.clone(), now);
        if let Some(collaboration) = &mut self.collaboration {
            let message = ChatMessage {
                txt,
                ts: unix_millis(),
            };
            collaboration.update_presence(now, |p| p.cursor_chat = Some(message));
        }
        self.emit(EditorEvent::SurfaceChanged);
    }

    pub fn close_cursor_chat(&mut self) {
        self.state.surface.close_cursor_chat();
        if let Some(collaboration) = &mut self.collaboration {
            collaboration.update_presence(Instant::now(), |p| p.cursor_chat = None);
        }
        self.emit(EditorEvent::SurfaceChanged);
    }

    /// Follow a remote cursor: the camera tracks its position.
    pub fn follow(&mut self, cursor_id: &str) -> Result<(), EditorError> {
        let position = self
            .collaboration
            .as_ref()
            .and_then(|c| c.presence().find_cursor(cursor_id))
            .map(|peer| peer.state.position)
            .ok_or_else(|| CommandError::precondition(format!("no cursor {cursor_id}")))?;
        self.state.surface.follow(cursor_id);
        if let Some(position) = position {
            self.state.camera.center_on(position);
            self.camera_changed();
        }
        self.emit(EditorEvent::SurfaceChanged);
        Ok(())
    }

    pub fn unfollow(&mut self) -> bool {
        let was_following = self.state.surface.unfollow();
        if was_following {
            self.emit(EditorEvent::SurfaceChanged);
        }
        was_following
    }

    // --- Content edit ---

    /// Enter content edit mode for `id` (vector or image nodes).
    pub fn try_enter_content_edit_mode(&mut self, id: &NodeId) -> bool {
        let Some(node) = self.state.document.get_node(id) else {
            return false;
        };
        if node.locked {
            return false;
        }
        let world = self.state.document.world_transform(id);
        let entered = self.state.tools.try_enter_content_edit_mode(node, world);
        if entered {
            self.emit(EditorEvent::ContentEditChanged);
        }
        entered
    }

    pub fn try_exit_content_edit_mode(&mut self) -> bool {
        let exited = self.state.tools.try_exit_content_edit_mode();
        if exited {
            self.emit(EditorEvent::ContentEditChanged);
        }
        exited
    }

    /// Write the content edit draft back to the document and leave content
    /// edit mode.
    ///
    /// Vector and width drafts become a property change. Bitmap drafts are
    /// returned for the host to rasterize.
    pub fn commit_content_edit(&mut self) -> Result<Option<ContentEditCommit>, EditorError> {
        if self.state.tools.content_edit_mode().is_dirty() {
            self.ensure_editable()?;
        }
        let Some(commit) = self.state.tools.commit_content_edit() else {
            self.emit(EditorEvent::ContentEditChanged);
            return Ok(None);
        };
        self.emit(EditorEvent::ContentEditChanged);
        let (node_id, network, profile) = match commit {
            ContentEditCommit::Vector { node_id, network } => (node_id, Some(network), None),
            ContentEditCommit::Width { node_id, profile } => (node_id, None, Some(profile)),
            bitmap @ ContentEditCommit::Bitmap { .. } => return Ok(Some(bitmap)),
        };
        let mut kind = self.state.document.node(&node_id)?.kind.clone();
        let NodeKind::Vector(data) = &mut kind else {
            return Err(CommandError::precondition(format!("{node_id} is no longer a vector")).into());
        };
        if let Some(network) = network {
            data.network = network;
        }
        if profile.is_some() {
            data.width_profile = profile;
        }
        self.set_property(&node_id, Property::Kind(kind))?;
        Ok(None)
    }

    pub fn discard_content_edit(&mut self) {
        self.state.tools.discard_content_edit();
        self.emit(EditorEvent::ContentEditChanged);
    }

    // --- Pointer input ---

    fn active_scene(&self) -> Result<NodeId, CommandError> {
        self.state
            .scene_id
            .clone()
            .ok_or_else(|| CommandError::invalid_parent("document has no scene"))
    }

    /// The top level node of the active scene containing `id`.
    fn top_level(&self, id: &NodeId) -> Option<NodeId> {
        let scene = self.state.scene_id.as_ref()?;
        let doc = &self.state.document;
        let mut current = id.clone();
        loop {
            let parent = doc.parent_of(&current)?;
            if parent == scene {
                return Some(current);
            }
            current = parent.clone();
        }
    }

    /// Topmost unlocked node under a scene-space point.
    fn pick(&self, world: Point) -> Option<NodeId> {
        let scene = self.state.scene_id.as_ref()?;
        let tolerance = HIT_TOLERANCE / self.state.camera.zoom;
        let doc = &self.state.document;
        doc.nodes_at_point(scene, world, tolerance)
            .into_iter()
            .filter_map(|id| self.top_level(&id))
            .find(|id| doc.get_node(id).is_some_and(|n| !n.locked))
    }

    /// Pointer pressed at a screen point. `additive` extends the selection.
    pub fn pointer_down(&mut self, screen: Point, additive: bool) {
        let world = self.state.camera.screen_to_world(screen);
        let mut moves_selection = false;
        if self.state.tools.tool() == ToolMode::Cursor
            && !self.state.tools.eager_canvas_input()
        {
            match self.pick(world) {
                Some(hit) => {
                    if additive {
                        self.state.selection.toggle(hit.clone());
                        self.selection_changed();
                    } else if !self.state.selection.contains(&hit) {
                        self.set_selection([hit.clone()]);
                    }
                    moves_selection = self.state.selection.contains(&hit);
                }
                None if !additive => self.set_selection([]),
                None => {}
            }
        }
        self.pointer = Some(PointerSession {
            last_screen: screen,
            start_world: world,
            moves_selection,
            additive,
        });
        self.state.tools.pointer_down(world);
    }

    pub fn pointer_move(&mut self, screen: Point) {
        let world = self.state.camera.screen_to_world(screen);
        let screen_delta = self.pointer.map(|p| screen - p.last_screen);
        if let Some(pointer) = &mut self.pointer {
            pointer.last_screen = screen;
        }
        if let Some(collaboration) = &mut self.collaboration {
            let marquee = self
                .pointer
                .filter(|p| !p.moves_selection && self.state.tools.tool() == ToolMode::Cursor)
                .filter(|_| self.state.tools.is_dragging() && !self.state.tools.eager_canvas_input())
                .map(|p| Rect::from_points(p.start_world, world));
            collaboration.update_presence(Instant::now(), |p| {
                p.position = Some(world);
                p.marquee = marquee;
            });
        }
        match self.state.tools.pointer_move(world) {
            ToolOutcome::Pan { .. } => {
                if let Some(delta) = screen_delta {
                    self.pan(delta);
                }
            }
            ToolOutcome::DraftChanged => self.emit(EditorEvent::ContentEditChanged),
            _ => {}
        }
    }

    /// Pointer released: the gesture's outcome is applied as commands.
    pub fn pointer_up(&mut self, screen: Point) -> Result<(), EditorError> {
        let world = self.state.camera.screen_to_world(screen);
        let pointer = self.pointer.take();
        let tool = self.state.tools.tool();
        let outcome = self.state.tools.pointer_up(world);
        let result = self.apply_outcome(outcome, pointer);
        self.state.tools.complete(matches!(result, Ok(true)));
        if let Some(collaboration) = &mut self.collaboration {
            collaboration.update_presence(Instant::now(), |p| p.marquee = None);
        }
        // Single-shot tools revert to the cursor after a committed gesture.
        if self.state.tools.tool() != tool {
            let tool = self.state.tools.tool();
            self.emit(EditorEvent::ToolChanged { tool });
        }
        result.map(|_| ())
    }

    /// Returns whether the outcome changed the document.
    fn apply_outcome(
        &mut self,
        outcome: ToolOutcome,
        pointer: Option<PointerSession>,
    ) -> Result<bool, EditorError> {
        let camera = &self.state.camera;
        match outcome {
            ToolOutcome::None | ToolOutcome::Click { .. } | ToolOutcome::Pan { .. } => Ok(false),
            ToolOutcome::DraftChanged => {
                self.emit(EditorEvent::ContentEditChanged);
                Ok(false)
            }
            ToolOutcome::Drag { start, end } => {
                if pointer.is_some_and(|p| p.moves_selection) {
                    let ids = self.selected();
                    self.translate(&ids, end - start)?;
                    return Ok(true);
                }
                let scene = self.active_scene()?;
                let hits = self
                    .state
                    .document
                    .nodes_in_rect(&scene, Rect::from_points(start, end));
                self.select_hits(hits, pointer);
                Ok(false)
            }
            ToolOutcome::ScaleDrag { start, end } => self.scale_selection(start, end),
            ToolOutcome::ZoomAt { point, zoom_in } => {
                let screen = camera.world_to_screen(point);
                let step = self.config.zoom_step;
                let factor = if zoom_in { step } else { 1.0 / step };
                self.state.camera.zoom_at(screen, factor);
                self.camera_changed();
                Ok(false)
            }
            ToolOutcome::ZoomToRect { rect } => {
                let screen = Rect::from_points(
                    camera.world_to_screen(Point::new(rect.x0, rect.y0)),
                    camera.world_to_screen(Point::new(rect.x1, rect.y1)),
                );
                self.state.camera.zoom_to_rect(screen);
                self.camera_changed();
                Ok(false)
            }
            ToolOutcome::Lasso { points } => {
                let scene = self.active_scene()?;
                let doc = &self.state.document;
                let hits: Vec<NodeId> = doc
                    .children_of(&scene)
                    .iter()
                    .filter(|id| {
                        doc.bounds_of(id)
                            .is_some_and(|b| math::point_in_polygon(b.center(), &points))
                    })
                    .cloned()
                    .collect();
                self.select_hits(hits, pointer);
                Ok(false)
            }
            ToolOutcome::Insert { kind, rect } => {
                self.insert_node(insert_node_for(kind, rect))?;
                Ok(true)
            }
            ToolOutcome::Draw { tool, points } => {
                let name = match tool {
                    DrawTool::Line => "line",
                    DrawTool::Pencil => "pencil",
                };
                let Some(node) = polyline_node(&points, name) else {
                    return Ok(false);
                };
                self.insert_node(node)?;
                Ok(true)
            }
            ToolOutcome::PathPoint { point } => {
                let node = Node::new(
                    NodeId::from(PLACEHOLDER_ID),
                    NodeKind::Vector(VectorData {
                        network: VectorNetwork::polyline(&[Point::ZERO]),
                        ..Default::default()
                    }),
                )
                .with_name("path")
                .with_transform(Transform::translate(point.to_vec2()));
                let id = self.insert_node(node)?;
                if self.try_enter_content_edit_mode(&id) {
                    self.state.tools.select_vertices([0]);
                }
                Ok(true)
            }
            ToolOutcome::Stroke { tool, points } => match tool {
                StrokeTool::Brush => {
                    let Some(mut node) = polyline_node(&points, "brush") else {
                        return Ok(false);
                    };
                    if let NodeKind::Vector(v) = &mut node.kind {
                        v.width_profile = Some(VariableWidthProfile {
                            base: BRUSH_WIDTH,
                            stops: Vec::new(),
                        });
                    }
                    self.insert_node(node)?;
                    Ok(true)
                }
                StrokeTool::Eraser => {
                    let mut hits: Vec<NodeId> = Vec::new();
                    for p in &points {
                        if let Some(hit) = self.pick(*p) {
                            if !hits.contains(&hit) {
                                hits.push(hit);
                            }
                        }
                    }
                    if hits.is_empty() {
                        return Ok(false);
                    }
                    self.delete(&hits)?;
                    Ok(true)
                }
            },
            ToolOutcome::Fill { point } => {
                let Some(hit) = self.pick(point) else {
                    return Ok(false);
                };
                let mut kind = self.state.document.node(&hit)?.kind.clone();
                let Some(fill) = kind.fill_mut() else {
                    return Ok(false);
                };
                *fill = Some(self.state.paint);
                self.set_property(&hit, Property::Kind(kind))?;
                Ok(true)
            }
        }
    }

    fn select_hits(&mut self, hits: Vec<NodeId>, pointer: Option<PointerSession>) {
        if pointer.is_some_and(|p| p.additive) {
            let mut ids = self.selected();
            ids.extend(hits);
            self.set_selection(ids);
        } else {
            self.set_selection(hits);
        }
    }

    /// Scale the selection about its top-left corner so `start` lands on
    /// `end`.
    fn scale_selection(&mut self, start: Point, end: Point) -> Result<bool, EditorError> {
        let ids = self.selected();
        let Some(bounds) = self.state.document.bounds_of_all(&ids) else {
            return Ok(false);
        };
        let anchor = bounds.origin();
        let from = start.distance(anchor);
        if from < f64::EPSILON {
            return Ok(false);
        }
        let factor = (end.distance(anchor) / from).max(0.01);
        let world = Transform(
            Affine::translate(anchor.to_vec2())
                * Affine::scale(factor)
                * Affine::translate(-anchor.to_vec2()),
        );
        let doc = &self.state.document;
        let mut commands = Vec::new();
        for id in &ids {
            let node = doc.node(id)?;
            let parent = doc
                .parent_of(id)
                .map(|p| doc.world_transform(p))
                .unwrap_or(Transform::IDENTITY);
            let relative = parent
                .invert()
                .compose(&world.compose(&parent.compose(&node.relative_transform)));
            commands.push(Command::set_transform(id.clone(), relative));
        }
        self.execute(Command::Batch { commands })?;
        Ok(true)
    }

    // --- Collaboration ---

    fn start_collaboration(&mut self, mut manager: CollaborationManager, room: &str) -> Result<(), EditorError> {
        if let Some(mut previous) = self.collaboration.take() {
            previous.destroy();
        }
        self.state
            .document
            .set_id_actor(manager.peer_id().to_string());
        manager.propose_document(&self.state.document)?;
        manager.join_room(room);
        log::info!("collaboration started in room {room} as peer {}", manager.peer_id());
        self.collaboration = Some(manager);
        Ok(())
    }

    /// Start a session whose messages the host delivers through
    /// [`take_sync_outgoing`](Self::take_sync_outgoing) and
    /// [`receive_sync_message`](Self::receive_sync_message).
    pub fn connect_collaboration(&mut self, room: &str, peer_id: u64) -> Result<(), EditorError> {
        let manager = CollaborationManager::new(peer_id, &self.config)?;
        self.start_collaboration(manager, room)
    }

    /// Start a session that drives `transport`, connected to `url`.
    pub fn connect_collaboration_with(
        &mut self,
        room: &str,
        peer_id: u64,
        transport: Box<dyn Transport>,
        url: &str,
    ) -> Result<(), EditorError> {
        let manager = CollaborationManager::with_transport(peer_id, &self.config, transport, url)?;
        self.start_collaboration(manager, room)
    }

    /// Pump the session: transport I/O, presence timers and remote merges.
    pub fn poll_sync(&mut self, now: Instant) -> Vec<SyncEvent> {
        if self.state.surface.expire_cursor_chat(now, self.config.cursor_chat_ttl()) {
            self.emit(EditorEvent::SurfaceChanged);
        }
        let events = match &mut self.collaboration {
            Some(collaboration) => collaboration.poll(now),
            None => return Vec::new(),
        };
        for event in &events {
            self.on_sync_event(event);
        }
        events
    }

    /// Deliver one server message received by the host.
    pub fn receive_sync_message(&mut self, json: &str) -> Option<SyncEvent> {
        let event = self.collaboration.as_mut()?.handle_message(json)?;
        self.on_sync_event(&event);
        Some(event)
    }

    pub fn take_sync_outgoing(&mut self) -> Vec<String> {
        self.collaboration
            .as_mut()
            .map(|c| c.take_outgoing())
            .unwrap_or_default()
    }

    /// Tell a host-driven session that its connection dropped.
    pub fn sync_disconnected(&mut self) -> Option<SyncError> {
        let err = self.collaboration.as_mut()?.on_disconnected();
        self.emit(EditorEvent::Sync(SyncEvent::ConnectionLost));
        Some(err)
    }

    /// Tell a host-driven session that its connection is back.
    pub fn sync_reconnected(&mut self) {
        if let Some(collaboration) = &mut self.collaboration {
            collaboration.on_connected();
            self.emit(EditorEvent::Sync(SyncEvent::Connected));
        }
    }

    pub fn destroy_collaboration(&mut self) {
        if let Some(mut collaboration) = self.collaboration.take() {
            collaboration.destroy();
        }
        self.state.surface.unfollow();
    }

    fn on_sync_event(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::PatchReceived { .. }
            | SyncEvent::JoinedRoom {
                merged_snapshot: true,
                ..
            } => {
                if let Err(e) = self.merge_remote() {
                    log::warn!("failed to merge remote changes: {e}");
                }
            }
            SyncEvent::PresenceChanged { from } => {
                let followed = self.state.surface.following.clone();
                let position = self.collaboration.as_ref().and_then(|c| {
                    let peer = c.presence().peer(from)?;
                    (followed.as_deref() == Some(peer.state.cursor_id.as_str()))
                        .then_some(peer.state.position)
                        .flatten()
                });
                if let Some(position) = position {
                    self.state.camera.center_on(position);
                    self.camera_changed();
                }
            }
            SyncEvent::PeerLeft { .. } | SyncEvent::PresenceExpired { .. } => {
                let gone = match (&self.state.surface.following, &self.collaboration) {
                    (Some(cursor), Some(c)) => c.presence().find_cursor(cursor).is_none(),
                    _ => false,
                };
                if gone {
                    self.state.surface.unfollow();
                }
            }
            _ => {}
        }
        self.emit(EditorEvent::Sync(event.clone()));
    }

    /// Rebuild the document from the merged CRDT state. Remote changes never
    /// enter the undo history.
    pub fn merge_remote(&mut self) -> Result<(), EditorError> {
        let Some(collaboration) = &self.collaboration else {
            return Ok(());
        };
        let mut merged = collaboration.materialize()?;
        merged.set_assets(self.state.document.assets().clone());
        merged.set_id_actor(collaboration.peer_id().to_string());
        let patch = diff_documents(&self.state.document, &merged);
        if patch.is_empty() {
            return Ok(());
        }
        log::debug!(
            "merged remote changes: {} updated, {} removed",
            patch.updated.len(),
            patch.removed.len()
        );
        self.state.document = merged;
        self.ensure_scene();
        if let Some(id) = self.state.tools.content_edit_mode().node_id() {
            if !self.state.document.contains(id) {
                self.state.tools.discard_content_edit();
                self.emit(EditorEvent::ContentEditChanged);
            }
        }
        if self
            .state
            .selection
            .retain_valid(&self.state.document, self.state.scene_id.as_ref())
        {
            self.selection_changed();
        }
        self.emit(EditorEvent::DocumentChanged { patch });
        Ok(())
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.destroy_collaboration();
    }
}
