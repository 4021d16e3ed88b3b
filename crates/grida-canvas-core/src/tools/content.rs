//! Content edit modes: in-place editing of a single node's geometry.

use kurbo::{Line, ParamCurveNearest, Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::math::Transform;
use crate::node::{NodeId, VariableWidthProfile, VectorNetwork, WidthStop};

/// Hit tolerance for vertices, in document units.
pub const VERTEX_HIT_TOLERANCE: f64 = 6.0;

/// Which kind of content edit to enter for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentEditKind {
    Vector,
    Width,
    Bitmap,
}

/// A recorded bitmap operation, replayed by the host rasterizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BitmapOp {
    Brush { points: Vec<Point> },
    Eraser { points: Vec<Point> },
    Fill { point: Point },
}

/// Draft state of the vector editor. Coordinates are in node-local space.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDraft {
    pub node_id: NodeId,
    pub draft: VectorNetwork,
    pub initial: VectorNetwork,
    pub selected_vertices: Vec<usize>,
    /// Document space to node-local space.
    pub to_local: Transform,
}

impl VectorDraft {
    pub fn is_dirty(&self) -> bool {
        self.draft != self.initial
    }

    /// The vertex new points are connected to.
    pub fn a_point(&self) -> Option<usize> {
        self.selected_vertices.first().copied()
    }

    /// Index of the vertex under a document-space point.
    pub fn vertex_at(&self, point: Point) -> Option<usize> {
        let local = self.to_local.apply(point);
        (0..self.draft.vertices.len())
            .filter_map(|i| self.draft.vertex(i).map(|v| (i, v.distance(local))))
            .filter(|(_, d)| *d <= VERTEX_HIT_TOLERANCE)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Add a vertex at a document-space point, connected to the current
    /// anchor, and make it the new anchor.
    pub fn add_point(&mut self, point: Point) -> usize {
        let local = self.to_local.apply(point);
        let index = self.draft.add_vertex(local, self.a_point());
        self.selected_vertices = vec![index];
        index
    }

    /// Move the selected vertices by a document-space delta.
    pub fn translate_selected(&mut self, delta: Vec2) {
        let d = self.to_local.apply(Point::ORIGIN + delta) - self.to_local.apply(Point::ORIGIN);
        self.draft.translate_vertices(&self.selected_vertices, d.x, d.y);
    }

    pub fn delete_selected(&mut self) {
        let selected = std::mem::take(&mut self.selected_vertices);
        self.draft.delete_vertices(&selected);
    }

    /// Bend the straight segment nearest to `start` so that its midpoint
    /// follows the drag delta.
    pub fn bend(&mut self, start: Point, delta: Vec2) -> Option<usize> {
        let local = self.to_local.apply(start);
        let d = self.to_local.apply(Point::ORIGIN + delta) - self.to_local.apply(Point::ORIGIN);
        let (index, _) = self
            .draft
            .segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let a = self.draft.vertex(s.a)?;
                let b = self.draft.vertex(s.b)?;
                Some((i, Line::new(a, b).nearest(local, 1e-6).distance_sq))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        // The midpoint of a cubic moves by 3/8 of the summed tangent offsets.
        let t = d * (4.0 / 3.0);
        let segment = &mut self.draft.segments[index];
        segment.ta = [t.x, t.y];
        segment.tb = [t.x, t.y];
        Some(index)
    }

    /// Project a document-space point onto the network's chord polyline.
    /// Returns the normalized arc position and the distance to it.
    pub fn project(&self, point: Point) -> Option<(f64, f64)> {
        let local = self.to_local.apply(point);
        let lines: Vec<Line> = self
            .draft
            .segments
            .iter()
            .filter_map(|s| Some(Line::new(self.draft.vertex(s.a)?, self.draft.vertex(s.b)?)))
            .collect();
        let total: f64 = lines.iter().map(|l| l.length()).sum();
        if total <= f64::EPSILON {
            return None;
        }
        let mut walked = 0.0;
        let mut best: Option<(f64, f64)> = None;
        for line in &lines {
            let nearest = line.nearest(local, 1e-6);
            let distance = nearest.distance_sq.sqrt();
            let u = (walked + line.length() * nearest.t) / total;
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((u, distance));
            }
            walked += line.length();
        }
        best
    }
}

/// The active content edit mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ContentEditMode {
    #[default]
    None,
    Vector(VectorDraft),
    Width {
        vector: VectorDraft,
        draft: VariableWidthProfile,
        initial: VariableWidthProfile,
    },
    Bitmap {
        node_id: NodeId,
        image_ref: String,
        ops: Vec<BitmapOp>,
    },
}

impl ContentEditMode {
    pub fn is_none(&self) -> bool {
        matches!(self, ContentEditMode::None)
    }

    pub fn kind(&self) -> Option<ContentEditKind> {
        match self {
            ContentEditMode::None => None,
            ContentEditMode::Vector(_) => Some(ContentEditKind::Vector),
            ContentEditMode::Width { .. } => Some(ContentEditKind::Width),
            ContentEditMode::Bitmap { .. } => Some(ContentEditKind::Bitmap),
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            ContentEditMode::None => None,
            ContentEditMode::Vector(v) => Some(&v.node_id),
            ContentEditMode::Width { vector, .. } => Some(&vector.node_id),
            ContentEditMode::Bitmap { node_id, .. } => Some(node_id),
        }
    }

    /// Whether the draft differs from what the node had on entry.
    pub fn is_dirty(&self) -> bool {
        match self {
            ContentEditMode::None => false,
            ContentEditMode::Vector(v) => v.is_dirty(),
            ContentEditMode::Width { draft, initial, .. } => draft != initial,
            ContentEditMode::Bitmap { ops, .. } => !ops.is_empty(),
        }
    }

    /// Add a width stop at the position along the path nearest to `point`.
    pub(crate) fn add_width_stop(&mut self, point: Point) -> Option<WidthStop> {
        let ContentEditMode::Width { vector, draft, .. } = self else {
            return None;
        };
        let (u, r) = vector.project(point)?;
        let stop = WidthStop { u, r };
        draft.set_stop(stop);
        Some(stop)
    }
}

/// A finished content edit, ready to be written back as a command.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentEditCommit {
    Vector {
        node_id: NodeId,
        network: VectorNetwork,
    },
    Width {
        node_id: NodeId,
        profile: VariableWidthProfile,
    },
    Bitmap {
        node_id: NodeId,
        image_ref: String,
        ops: Vec<BitmapOp>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> VectorDraft {
        let network = VectorNetwork::polyline(&[Point::new(0.0, 0.0), Point::new(100.0, 0.0)]);
        VectorDraft {
            node_id: NodeId::from("v"),
            draft: network.clone(),
            initial: network,
            selected_vertices: Vec::new(),
            to_local: Transform::translate(Vec2::new(-10.0, -10.0)),
        }
    }

    #[test]
    fn test_add_point_connects_to_anchor() {
        let mut d = draft();
        d.selected_vertices = vec![1];
        let index = d.add_point(Point::new(110.0, 60.0));
        assert_eq!(index, 2);
        assert_eq!(d.draft.vertex(2), Some(Point::new(100.0, 50.0)));
        assert_eq!(d.draft.segments.last().map(|s| (s.a, s.b)), Some((1, 2)));
        assert_eq!(d.a_point(), Some(2));
        assert!(d.is_dirty());
    }

    #[test]
    fn test_vertex_hit_uses_local_space() {
        let d = draft();
        assert_eq!(d.vertex_at(Point::new(111.0, 10.0)), Some(1));
        assert_eq!(d.vertex_at(Point::new(50.0, 50.0)), None);
    }

    #[test]
    fn test_bend_marks_segment_curved() {
        let mut d = draft();
        assert_eq!(d.bend(Point::new(60.0, 10.0), Vec2::new(0.0, 30.0)), Some(0));
        assert!(!d.draft.segments[0].is_straight());
    }

    #[test]
    fn test_project_midpoint() {
        let d = draft();
        let (u, r) = d.project(Point::new(60.0, 20.0)).unwrap();
        assert!((u - 0.5).abs() < 1e-9);
        assert!((r - 10.0).abs() < 1e-9);
    }
}
