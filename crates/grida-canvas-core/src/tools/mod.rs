//! Tool system: the active tool, pointer gestures and content edit modes.

mod content;

pub use content::{
    BitmapOp, ContentEditCommit, ContentEditKind, ContentEditMode, VERTEX_HIT_TOLERANCE,
    VectorDraft,
};

use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::math::Transform;
use crate::node::{Node, NodeKind, VectorSegment};

/// Pointer travel below which a gesture counts as a click.
pub const DRAG_THRESHOLD: f64 = 3.0;

/// Size of a node inserted by a click instead of a drag.
pub const DEFAULT_INSERT_SIZE: f64 = 100.0;

/// Node kinds the insert tool can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertKind {
    Text,
    Image,
    Container,
    Rectangle,
    Ellipse,
    Polygon,
    Star,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawTool {
    Line,
    Pencil,
}

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ToolMode {
    #[default]
    Cursor,
    Hand,
    Scale,
    Zoom,
    Lasso,
    Insert {
        node: InsertKind,
    },
    Draw {
        tool: DrawTool,
    },
    Path,
    #[serde(alias = "variable-width")]
    Width,
    Bend,
    Brush,
    Eraser,
    FloodFill,
    PaintBucket,
}

impl ToolMode {
    /// Insert tools revert to the cursor after one successful insertion.
    pub fn is_single_shot(&self) -> bool {
        matches!(self, ToolMode::Insert { .. })
    }

    /// Whether the tool may stay active in the given content edit mode.
    pub fn allowed_in(&self, kind: Option<ContentEditKind>) -> bool {
        use ToolMode::*;
        match kind {
            None => true,
            Some(ContentEditKind::Vector) => {
                matches!(self, Cursor | Hand | Zoom | Path | Lasso | Bend | Width)
            }
            Some(ContentEditKind::Width) => matches!(self, Cursor | Hand | Zoom | Width),
            Some(ContentEditKind::Bitmap) => {
                matches!(self, Cursor | Hand | Zoom | Brush | Eraser | FloodFill | PaintBucket)
            }
        }
    }
}

/// Pointer gesture sub-state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Dragging {
        start: Point,
        current: Point,
        points: Vec<Point>,
    },
    /// The gesture ended and its outcome is being applied.
    Committing,
}

/// Bitmap painting tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeTool {
    Brush,
    Eraser,
}

/// What a finished (or ongoing) gesture asks the editor to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    None,
    Click { point: Point },
    Drag { start: Point, end: Point },
    ScaleDrag { start: Point, end: Point },
    Pan { delta: Vec2 },
    ZoomAt { point: Point, zoom_in: bool },
    ZoomToRect { rect: Rect },
    Lasso { points: Vec<Point> },
    Insert { kind: InsertKind, rect: Rect },
    Draw { tool: DrawTool, points: Vec<Point> },
    /// A point placed with the path tool outside vector edit mode.
    PathPoint { point: Point },
    Stroke { tool: StrokeTool, points: Vec<Point> },
    Fill { point: Point },
    /// The content edit draft changed.
    DraftChanged,
}

/// Manages the current tool, the gesture in progress and the content edit
/// mode.
#[derive(Debug, Clone, Default)]
pub struct ToolController {
    tool: ToolMode,
    /// Tool to restore after a temporary override (e.g. holding space).
    previous: Option<ToolMode>,
    gesture: Gesture,
    content: ContentEditMode,
}

impl ToolController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(&self) -> ToolMode {
        self.tool
    }

    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn content_edit_mode(&self) -> &ContentEditMode {
        &self.content
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.gesture, Gesture::Dragging { .. })
    }

    /// Whether pointer input goes straight to the canvas, bypassing node
    /// selection.
    pub fn eager_canvas_input(&self) -> bool {
        !self.content.is_none() || self.tool.is_single_shot()
    }

    /// Switch tools, cancelling any gesture in progress.
    ///
    /// A tool that cannot operate in the current content edit mode leaves
    /// the mode when the draft is clean and is refused otherwise.
    pub fn set_tool(&mut self, tool: ToolMode) -> Result<(), CommandError> {
        if !tool.allowed_in(self.content.kind()) {
            if self.content.is_dirty() {
                return Err(CommandError::precondition(
                    "content edit has uncommitted changes",
                ));
            }
            self.content = ContentEditMode::None;
        }
        if let ContentEditMode::Vector(vector) = &self.content {
            if tool == ToolMode::Width {
                let vector = vector.clone();
                self.content = ContentEditMode::Width {
                    vector,
                    draft: Default::default(),
                    initial: Default::default(),
                };
            }
        }
        self.tool = tool;
        self.previous = None;
        self.gesture = Gesture::Idle;
        Ok(())
    }

    /// Temporarily switch tools; [`pop_temporary_tool`] restores the
    /// previous one.
    ///
    /// [`pop_temporary_tool`]: ToolController::pop_temporary_tool
    /// Refused, like [`set_tool`](ToolController::set_tool), for a tool
    /// that cannot operate in the current content edit mode.
    pub fn push_temporary_tool(&mut self, tool: ToolMode) -> Result<(), CommandError> {
        if !tool.allowed_in(self.content.kind()) {
            return Err(CommandError::precondition(
                "tool is not available in this content edit mode",
            ));
        }
        if self.previous.is_none() {
            self.previous = Some(self.tool);
        }
        self.tool = tool;
        self.gesture = Gesture::Idle;
        Ok(())
    }

    pub fn pop_temporary_tool(&mut self) -> bool {
        match self.previous.take() {
            Some(previous) => {
                self.tool = previous;
                self.gesture = Gesture::Idle;
                true
            }
            None => false,
        }
    }

    /// Begin a pointer gesture.
    pub fn pointer_down(&mut self, point: Point) -> ToolOutcome {
        self.gesture = Gesture::Dragging {
            start: point,
            current: point,
            points: vec![point],
        };
        if let (ToolMode::Cursor, ContentEditMode::Vector(v)) = (self.tool, &mut self.content) {
            match v.vertex_at(point) {
                Some(i) if v.selected_vertices.contains(&i) => {}
                Some(i) => v.selected_vertices = vec![i],
                None => v.selected_vertices.clear(),
            }
        }
        ToolOutcome::None
    }

    /// Continue a pointer gesture.
    pub fn pointer_move(&mut self, point: Point) -> ToolOutcome {
        let Gesture::Dragging {
            current, points, ..
        } = &mut self.gesture
        else {
            return ToolOutcome::None;
        };
        let delta = point - *current;
        *current = point;
        points.push(point);

        match (self.tool, &mut self.content) {
            (ToolMode::Hand, _) => ToolOutcome::Pan { delta },
            (ToolMode::Cursor, ContentEditMode::Vector(v)) if !v.selected_vertices.is_empty() => {
                v.translate_selected(delta);
                ToolOutcome::DraftChanged
            }
            _ => ToolOutcome::None,
        }
    }

    /// Finish a pointer gesture. The gesture stays in `Committing` until
    /// [`complete`] is called.
    ///
    /// [`complete`]: ToolController::complete
    pub fn pointer_up(&mut self, point: Point) -> ToolOutcome {
        let Gesture::Dragging {
            start,
            current,
            points,
        } = std::mem::replace(&mut self.gesture, Gesture::Committing)
        else {
            self.gesture = Gesture::Idle;
            return ToolOutcome::None;
        };
        let mut points = points;
        if points.last() != Some(&point) {
            points.push(point);
        }
        let is_click = start.distance(point) < DRAG_THRESHOLD;
        let delta = point - start;

        if let ContentEditMode::Width { .. } = self.content {
            if self.tool == ToolMode::Width && self.content.add_width_stop(point).is_some() {
                return ToolOutcome::DraftChanged;
            }
            return ToolOutcome::None;
        }

        match &mut self.content {
            ContentEditMode::None => {}
            ContentEditMode::Vector(v) => {
                return match self.tool {
                    ToolMode::Path => {
                        match v.vertex_at(point) {
                            // Clicking an existing vertex closes onto it.
                            Some(i) => match v.a_point() {
                                Some(a) if a != i => {
                                    v.draft.segments.push(VectorSegment::line(a, i));
                                    v.selected_vertices = vec![i];
                                }
                                _ => v.selected_vertices = vec![i],
                            },
                            None => {
                                v.add_point(point);
                            }
                        }
                        ToolOutcome::DraftChanged
                    }
                    ToolMode::Bend if !is_click => match v.bend(start, delta) {
                        Some(_) => ToolOutcome::DraftChanged,
                        None => ToolOutcome::None,
                    },
                    ToolMode::Cursor if !v.selected_vertices.is_empty() => {
                        // Movement since the last pointer_move.
                        let rest = point - current;
                        if rest != Vec2::ZERO {
                            v.translate_selected(rest);
                        }
                        if is_click && rest == Vec2::ZERO {
                            ToolOutcome::None
                        } else {
                            ToolOutcome::DraftChanged
                        }
                    }
                    ToolMode::Lasso => {
                        let inverse = v.to_local.invert();
                        v.selected_vertices = (0..v.draft.vertices.len())
                            .filter(|i| {
                                v.draft.vertex(*i).is_some_and(|p| {
                                    crate::math::point_in_polygon(inverse.apply(p), &points)
                                })
                            })
                            .collect();
                        ToolOutcome::None
                    }
                    _ => ToolOutcome::None,
                };
            }
            ContentEditMode::Width { .. } => return ToolOutcome::None,
            ContentEditMode::Bitmap { ops, .. } => {
                let op = match self.tool {
                    ToolMode::Brush => Some(BitmapOp::Brush { points }),
                    ToolMode::Eraser => Some(BitmapOp::Eraser { points }),
                    ToolMode::FloodFill | ToolMode::PaintBucket => Some(BitmapOp::Fill { point }),
                    _ => None,
                };
                return match op {
                    Some(op) => {
                        ops.push(op);
                        ToolOutcome::DraftChanged
                    }
                    None => ToolOutcome::None,
                };
            }
        }

        match self.tool {
            ToolMode::Cursor if is_click => ToolOutcome::Click { point },
            ToolMode::Cursor => ToolOutcome::Drag { start, end: point },
            ToolMode::Hand => ToolOutcome::None,
            ToolMode::Scale if is_click => ToolOutcome::None,
            ToolMode::Scale => ToolOutcome::ScaleDrag { start, end: point },
            ToolMode::Zoom if is_click => ToolOutcome::ZoomAt {
                point,
                zoom_in: true,
            },
            ToolMode::Zoom => ToolOutcome::ZoomToRect {
                rect: Rect::from_points(start, point),
            },
            ToolMode::Lasso if points.len() < 3 => ToolOutcome::None,
            ToolMode::Lasso => ToolOutcome::Lasso { points },
            ToolMode::Insert { node } => {
                let rect = if is_click {
                    Rect::from_origin_size(start, (DEFAULT_INSERT_SIZE, DEFAULT_INSERT_SIZE))
                } else {
                    Rect::from_points(start, point)
                };
                ToolOutcome::Insert { kind: node, rect }
            }
            ToolMode::Draw { .. } if is_click => ToolOutcome::None,
            ToolMode::Draw { tool: DrawTool::Line } => ToolOutcome::Draw {
                tool: DrawTool::Line,
                points: vec![start, point],
            },
            ToolMode::Draw { tool: DrawTool::Pencil } => ToolOutcome::Draw {
                tool: DrawTool::Pencil,
                points,
            },
            ToolMode::Path => ToolOutcome::PathPoint { point },
            ToolMode::Width | ToolMode::Bend => ToolOutcome::None,
            ToolMode::Brush => ToolOutcome::Stroke {
                tool: StrokeTool::Brush,
                points,
            },
            ToolMode::Eraser => ToolOutcome::Stroke {
                tool: StrokeTool::Eraser,
                points,
            },
            ToolMode::FloodFill | ToolMode::PaintBucket => ToolOutcome::Fill { point },
        }
    }

    /// Abandon the gesture in progress.
    pub fn cancel(&mut self) {
        self.gesture = Gesture::Idle;
    }

    /// Close the committing gesture. A single-shot tool returns to the cursor
    /// only if its outcome was applied.
    pub fn complete(&mut self, committed: bool) {
        self.gesture = Gesture::Idle;
        if committed && self.tool.is_single_shot() {
            self.tool = ToolMode::Cursor;
        }
    }

    /// Enter content edit mode for `node`, whose world transform is `world`.
    ///
    /// Vector nodes open the vector editor (or the width editor when the
    /// width tool is active); image nodes open the bitmap editor. Refused
    /// while dragging or while another edit has uncommitted changes.
    pub fn try_enter_content_edit_mode(&mut self, node: &Node, world: Transform) -> bool {
        if self.is_dragging() || self.content.is_dirty() {
            return false;
        }
        let mode = match &node.kind {
            NodeKind::Vector(data) => {
                let vector = VectorDraft {
                    node_id: node.id.clone(),
                    draft: data.network.clone(),
                    initial: data.network.clone(),
                    selected_vertices: Vec::new(),
                    to_local: world.invert(),
                };
                if self.tool == ToolMode::Width {
                    let profile = data.width_profile.clone().unwrap_or_default();
                    ContentEditMode::Width {
                        vector,
                        draft: profile.clone(),
                        initial: profile,
                    }
                } else {
                    ContentEditMode::Vector(vector)
                }
            }
            NodeKind::Image(image) => ContentEditMode::Bitmap {
                node_id: node.id.clone(),
                image_ref: image.image_ref.clone(),
                ops: Vec::new(),
            },
            _ => return false,
        };
        log::debug!("enter {:?} edit for {}", mode.kind(), node.id);
        if !self.tool.allowed_in(mode.kind()) {
            self.tool = ToolMode::Cursor;
        }
        self.content = mode;
        self.gesture = Gesture::Idle;
        true
    }

    /// Leave content edit mode. Refused while dragging or while the draft
    /// has uncommitted changes.
    pub fn try_exit_content_edit_mode(&mut self) -> bool {
        if self.is_dragging() || self.content.is_dirty() {
            return false;
        }
        self.content = ContentEditMode::None;
        true
    }

    /// Take the draft for writing back and leave content edit mode. Returns
    /// `None` when there was nothing to commit.
    pub fn commit_content_edit(&mut self) -> Option<ContentEditCommit> {
        if self.is_dragging() {
            return None;
        }
        let dirty = self.content.is_dirty();
        let mode = std::mem::take(&mut self.content);
        if !dirty {
            return None;
        }
        match mode {
            ContentEditMode::None => None,
            ContentEditMode::Vector(v) => Some(ContentEditCommit::Vector {
                node_id: v.node_id,
                network: v.draft,
            }),
            ContentEditMode::Width { vector, draft, .. } => Some(ContentEditCommit::Width {
                node_id: vector.node_id,
                profile: draft,
            }),
            ContentEditMode::Bitmap {
                node_id,
                image_ref,
                ops,
            } => Some(ContentEditCommit::Bitmap {
                node_id,
                image_ref,
                ops,
            }),
        }
    }

    /// Drop the draft and leave content edit mode.
    pub fn discard_content_edit(&mut self) {
        self.gesture = Gesture::Idle;
        self.content = ContentEditMode::None;
    }

    /// Select vertices of the vector draft. Out of range indices are ignored.
    pub fn select_vertices(&mut self, indices: impl IntoIterator<Item = usize>) -> bool {
        let ContentEditMode::Vector(v) = &mut self.content else {
            return false;
        };
        let count = v.draft.vertices.len();
        v.selected_vertices = indices.into_iter().filter(|i| *i < count).collect();
        true
    }

    /// Delete the selected vertices of the vector draft.
    pub fn delete_selected_vertices(&mut self) -> bool {
        match &mut self.content {
            ContentEditMode::Vector(v) if !v.selected_vertices.is_empty() => {
                v.delete_selected();
                true
            }
            _ => false,
        }
    }

    /// Reset to the initial state: cursor tool, no gesture, no content edit.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ImageData, VectorData, VectorNetwork};

    fn vector_node() -> Node {
        Node::new(
            "v",
            NodeKind::Vector(VectorData {
                network: VectorNetwork::polyline(&[Point::new(0.0, 0.0), Point::new(100.0, 0.0)]),
                ..Default::default()
            }),
        )
    }

    fn gesture(tools: &mut ToolController, from: Point, to: Point) -> ToolOutcome {
        tools.pointer_down(from);
        tools.pointer_move(to);
        tools.pointer_up(to)
    }

    #[test]
    fn test_tool_json_shape() {
        let tool = ToolMode::Insert {
            node: InsertKind::Rectangle,
        };
        assert_eq!(
            serde_json::to_string(&tool).unwrap(),
            r#"{"type":"insert","node":"rectangle"}"#
        );
        let fill: ToolMode = serde_json::from_str(r#"{"type":"flood-fill"}"#).unwrap();
        assert_eq!(fill, ToolMode::FloodFill);
        let width: ToolMode = serde_json::from_str(r#"{"type":"variable-width"}"#).unwrap();
        assert_eq!(width, ToolMode::Width);
    }

    #[test]
    fn test_insert_click_uses_default_size() {
        let mut tools = ToolController::new();
        tools.set_tool(ToolMode::Insert { node: InsertKind::Ellipse }).unwrap();
        let p = Point::new(10.0, 20.0);
        tools.pointer_down(p);
        let outcome = tools.pointer_up(p);
        assert_eq!(
            outcome,
            ToolOutcome::Insert {
                kind: InsertKind::Ellipse,
                rect: Rect::new(10.0, 20.0, 110.0, 120.0),
            }
        );
        assert_eq!(tools.gesture(), &Gesture::Committing);
    }

    #[test]
    fn test_insert_is_single_shot_only_on_commit() {
        let mut tools = ToolController::new();
        let insert = ToolMode::Insert { node: InsertKind::Rectangle };
        tools.set_tool(insert).unwrap();
        gesture(&mut tools, Point::ZERO, Point::new(50.0, 50.0));
        tools.complete(false);
        assert_eq!(tools.tool(), insert);
        gesture(&mut tools, Point::ZERO, Point::new(50.0, 50.0));
        tools.complete(true);
        assert_eq!(tools.tool(), ToolMode::Cursor);
        assert_eq!(tools.gesture(), &Gesture::Idle);
    }

    #[test]
    fn test_brush_persists() {
        let mut tools = ToolController::new();
        tools.set_tool(ToolMode::Brush).unwrap();
        let outcome = gesture(&mut tools, Point::ZERO, Point::new(5.0, 5.0));
        assert!(matches!(outcome, ToolOutcome::Stroke { tool: StrokeTool::Brush, .. }));
        tools.complete(true);
        assert_eq!(tools.tool(), ToolMode::Brush);
    }

    #[test]
    fn test_hand_pans_on_move() {
        let mut tools = ToolController::new();
        tools.set_tool(ToolMode::Hand).unwrap();
        tools.pointer_down(Point::new(0.0, 0.0));
        assert_eq!(
            tools.pointer_move(Point::new(4.0, 3.0)),
            ToolOutcome::Pan { delta: Vec2::new(4.0, 3.0) }
        );
    }

    #[test]
    fn test_set_tool_cancels_gesture() {
        let mut tools = ToolController::new();
        tools.pointer_down(Point::ZERO);
        assert!(tools.is_dragging());
        tools.set_tool(ToolMode::Hand).unwrap();
        assert_eq!(tools.gesture(), &Gesture::Idle);
    }

    #[test]
    fn test_temporary_tool() {
        let mut tools = ToolController::new();
        tools.set_tool(ToolMode::Brush).unwrap();
        tools.push_temporary_tool(ToolMode::Hand).unwrap();
        assert_eq!(tools.tool(), ToolMode::Hand);
        assert!(tools.pop_temporary_tool());
        assert_eq!(tools.tool(), ToolMode::Brush);
        assert!(!tools.pop_temporary_tool());
    }

    #[test]
    fn test_vector_edit_guarded_exit() {
        let mut tools = ToolController::new();
        assert!(tools.try_enter_content_edit_mode(&vector_node(), Transform::IDENTITY));
        assert!(tools.eager_canvas_input());
        tools.set_tool(ToolMode::Path).unwrap();
        tools.pointer_down(Point::new(50.0, 50.0));
        assert!(!tools.try_exit_content_edit_mode(), "refused while dragging");
        assert_eq!(tools.pointer_up(Point::new(50.0, 50.0)), ToolOutcome::DraftChanged);
        tools.complete(true);
        assert!(!tools.try_exit_content_edit_mode(), "refused while dirty");
        assert!(tools.set_tool(ToolMode::Brush).is_err());

        let commit = tools.commit_content_edit().unwrap();
        let ContentEditCommit::Vector { network, .. } = commit else {
            panic!("expected vector commit");
        };
        assert_eq!(network.vertices.len(), 3);
        assert!(tools.content_edit_mode().is_none());
    }

    #[test]
    fn test_clean_vector_edit_exits() {
        let mut tools = ToolController::new();
        assert!(tools.try_enter_content_edit_mode(&vector_node(), Transform::IDENTITY));
        assert!(tools.try_exit_content_edit_mode());
        assert!(tools.commit_content_edit().is_none());
    }

    #[test]
    fn test_vertex_drag_and_delete() {
        let mut tools = ToolController::new();
        tools.try_enter_content_edit_mode(&vector_node(), Transform::IDENTITY);
        tools.pointer_down(Point::new(100.0, 0.0));
        tools.pointer_move(Point::new(100.0, 20.0));
        tools.pointer_up(Point::new(100.0, 20.0));
        tools.complete(true);
        let ContentEditMode::Vector(v) = tools.content_edit_mode() else {
            panic!("expected vector mode");
        };
        assert_eq!(v.draft.vertex(1), Some(Point::new(100.0, 20.0)));
        assert!(tools.delete_selected_vertices());
        let ContentEditMode::Vector(v) = tools.content_edit_mode() else {
            panic!("expected vector mode");
        };
        assert_eq!(v.draft.vertices.len(), 1);
        assert!(v.draft.segments.is_empty());
    }

    #[test]
    fn test_vertex_drag_applies_final_pointer_position() {
        let mut tools = ToolController::new();
        tools.try_enter_content_edit_mode(&vector_node(), Transform::IDENTITY);
        tools.pointer_down(Point::new(100.0, 0.0));
        tools.pointer_move(Point::new(100.0, 10.0));
        assert_eq!(tools.pointer_up(Point::new(120.0, 30.0)), ToolOutcome::DraftChanged);
        tools.complete(true);
        let Some(ContentEditCommit::Vector { network, .. }) = tools.commit_content_edit() else {
            panic!("expected vector commit");
        };
        assert_eq!(network.vertex(1), Some(Point::new(120.0, 30.0)));
    }

    #[test]
    fn test_temporary_tool_respects_content_edit_mode() {
        let mut tools = ToolController::new();
        assert!(tools.try_enter_content_edit_mode(&vector_node(), Transform::IDENTITY));
        assert!(tools.push_temporary_tool(ToolMode::Brush).is_err());
        assert_eq!(tools.tool(), ToolMode::Cursor);
        assert!(!tools.pop_temporary_tool());
        tools.push_temporary_tool(ToolMode::Hand).unwrap();
        assert_eq!(tools.tool(), ToolMode::Hand);
    }

    #[test]
    fn test_width_stop() {
        let mut tools = ToolController::new();
        tools.set_tool(ToolMode::Width).unwrap();
        assert!(tools.try_enter_content_edit_mode(&vector_node(), Transform::IDENTITY));
        assert_eq!(tools.content_edit_mode().kind(), Some(ContentEditKind::Width));
        tools.pointer_down(Point::new(25.0, 4.0));
        assert_eq!(tools.pointer_up(Point::new(25.0, 4.0)), ToolOutcome::DraftChanged);
        let Some(ContentEditCommit::Width { profile, .. }) = tools.commit_content_edit() else {
            panic!("expected width commit");
        };
        assert_eq!(profile.stops.len(), 1);
        assert!((profile.stops[0].u - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_bitmap_mode_records_strokes() {
        let mut tools = ToolController::new();
        let image = Node::new(
            "img",
            NodeKind::Image(ImageData {
                image_ref: "abc".into(),
                width: 10.0,
                height: 10.0,
            }),
        );
        assert!(tools.try_enter_content_edit_mode(&image, Transform::IDENTITY));
        tools.set_tool(ToolMode::Brush).unwrap();
        assert_eq!(
            gesture(&mut tools, Point::ZERO, Point::new(3.0, 3.0)),
            ToolOutcome::DraftChanged
        );
        tools.complete(true);
        assert!(tools.content_edit_mode().is_dirty());
        assert!(tools.set_tool(ToolMode::Lasso).is_err());
    }

    #[test]
    fn test_enter_refused_for_rectangle() {
        let mut tools = ToolController::new();
        let rect = Node::new("r", NodeKind::Rectangle(crate::node::BoxData::new(1.0, 1.0)));
        assert!(!tools.try_enter_content_edit_mode(&rect, Transform::IDENTITY));
    }
}
