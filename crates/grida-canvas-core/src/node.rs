//! Node schema: the common attribute set and the per-kind payloads.

use std::fmt;

use kurbo::{BezPath, Point, Rect, Shape as _, Size};
use serde::{Deserialize, Serialize};

use crate::color::Rgba32F;
use crate::math::Transform;

/// Stable node identifier, unique within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn default_true() -> bool {
    true
}

/// A document node.
///
/// Children are referenced by id; the nodes themselves live in the document's
/// flat node map. Scene roots are kept in `Document::links`, not in `children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub relative_transform: Transform,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeId>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: kind.type_name().to_string(),
            id,
            active: true,
            locked: false,
            visible: true,
            relative_transform: Transform::IDENTITY,
            children: Vec::new(),
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.relative_transform = transform;
        self
    }

    pub fn with_children(mut self, children: Vec<NodeId>) -> Self {
        self.children = children;
        self
    }

    pub fn is_scene(&self) -> bool {
        matches!(self.kind, NodeKind::Scene(_))
    }
}

/// Per-kind node payload, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Scene(SceneData),
    Group,
    Container(BoxData),
    Rectangle(BoxData),
    Ellipse(BoxData),
    Vector(VectorData),
    Text(TextData),
    Image(ImageData),
    Instance(InstanceData),
    Boolean(BooleanData),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Scene(_) => "scene",
            NodeKind::Group => "group",
            NodeKind::Container(_) => "container",
            NodeKind::Rectangle(_) => "rectangle",
            NodeKind::Ellipse(_) => "ellipse",
            NodeKind::Vector(_) => "vector",
            NodeKind::Text(_) => "text",
            NodeKind::Image(_) => "image",
            NodeKind::Instance(_) => "instance",
            NodeKind::Boolean(_) => "boolean",
        }
    }

    /// Whether nodes of this kind may hold children.
    pub fn accepts_children(&self) -> bool {
        matches!(
            self,
            NodeKind::Scene(_) | NodeKind::Group | NodeKind::Container(_) | NodeKind::Boolean(_)
        )
    }

    /// Intrinsic local bounds. Groups, booleans and scenes derive their bounds
    /// from their children and return `None`.
    pub fn local_bounds(&self) -> Option<Rect> {
        let size = match self {
            NodeKind::Container(b) | NodeKind::Rectangle(b) | NodeKind::Ellipse(b) => {
                Size::new(b.width, b.height)
            }
            NodeKind::Vector(v) => return Some(v.network.bounds()),
            NodeKind::Text(t) => Size::new(t.width, t.height),
            NodeKind::Image(i) => Size::new(i.width, i.height),
            NodeKind::Instance(i) => Size::new(i.width, i.height),
            NodeKind::Scene(_) | NodeKind::Group | NodeKind::Boolean(_) => return None,
        };
        Some(Rect::from_origin_size(Point::ZERO, size))
    }

    /// The fill slot paint tools write to, if the kind has one.
    pub fn fill_mut(&mut self) -> Option<&mut Option<Rgba32F>> {
        match self {
            NodeKind::Container(b) | NodeKind::Rectangle(b) | NodeKind::Ellipse(b) => Some(&mut b.fill),
            NodeKind::Vector(v) => Some(&mut v.fill),
            _ => None,
        }
    }

    pub fn same_variant(&self, other: &NodeKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Whether top-level children of a scene form a single artboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildrenConstraint {
    Single,
    #[default]
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SceneConstraints {
    pub children: ChildrenConstraint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Guide {
    pub axis: Axis,
    pub offset: f64,
}

/// One end of a relational edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgePoint {
    Position { x: f64, y: f64 },
    Anchor { target: NodeId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub a: EdgePoint,
    pub b: EdgePoint,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneData {
    #[serde(default)]
    pub constraints: SceneConstraints,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guides: Vec<Guide>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Rgba32F>,
}

/// Payload for box-shaped nodes: containers, rectangles and ellipses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxData {
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Rgba32F>,
    #[serde(default)]
    pub corner_radius: f64,
}

impl BoxData {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillRule {
    #[default]
    Nonzero,
    Evenodd,
}

/// A segment between vertices `a` and `b` with tangents relative to them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorSegment {
    pub a: usize,
    pub b: usize,
    #[serde(default)]
    pub ta: [f64; 2],
    #[serde(default)]
    pub tb: [f64; 2],
}

impl VectorSegment {
    pub fn line(a: usize, b: usize) -> Self {
        Self {
            a,
            b,
            ta: [0.0, 0.0],
            tb: [0.0, 0.0],
        }
    }

    pub fn is_straight(&self) -> bool {
        self.ta == [0.0, 0.0] && self.tb == [0.0, 0.0]
    }
}

/// Vertex/segment graph describing a vector shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorNetwork {
    pub vertices: Vec<[f64; 2]>,
    pub segments: Vec<VectorSegment>,
}

impl VectorNetwork {
    /// An open polyline through `points`.
    pub fn polyline(points: &[Point]) -> Self {
        let vertices = points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
        let segments = (1..vertices.len()).map(|i| VectorSegment::line(i - 1, i)).collect();
        Self { vertices, segments }
    }

    /// A closed polygon through `points`.
    pub fn polygon(points: &[Point]) -> Self {
        let mut network = Self::polyline(points);
        if points.len() > 2 {
            network.segments.push(VectorSegment::line(points.len() - 1, 0));
        }
        network
    }

    pub fn vertex(&self, index: usize) -> Option<Point> {
        self.vertices.get(index).map(|v| Point::new(v[0], v[1]))
    }

    /// Append a vertex, optionally connected to `from`. Returns its index.
    pub fn add_vertex(&mut self, point: Point, from: Option<usize>) -> usize {
        self.vertices.push([point.x, point.y]);
        let index = self.vertices.len() - 1;
        if let Some(from) = from.filter(|f| *f < index) {
            self.segments.push(VectorSegment::line(from, index));
        }
        index
    }

    /// Remove vertices and every segment touching them, reindexing the rest.
    pub fn delete_vertices(&mut self, indices: &[usize]) {
        let mut remap = Vec::with_capacity(self.vertices.len());
        let mut next = 0;
        for i in 0..self.vertices.len() {
            if indices.contains(&i) {
                remap.push(None);
            } else {
                remap.push(Some(next));
                next += 1;
            }
        }
        self.vertices = self
            .vertices
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, v)| *v)
            .collect();
        self.segments = self
            .segments
            .iter()
            .filter_map(|s| {
                let a = remap.get(s.a).copied().flatten()?;
                let b = remap.get(s.b).copied().flatten()?;
                Some(VectorSegment { a, b, ..*s })
            })
            .collect();
    }

    pub fn translate_vertices(&mut self, indices: &[usize], dx: f64, dy: f64) {
        for &i in indices {
            if let Some(v) = self.vertices.get_mut(i) {
                v[0] += dx;
                v[1] += dy;
            }
        }
    }

    pub fn to_bez_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let mut last: Option<usize> = None;
        for seg in &self.segments {
            let (Some(a), Some(b)) = (self.vertex(seg.a), self.vertex(seg.b)) else {
                continue;
            };
            if last != Some(seg.a) {
                path.move_to(a);
            }
            if seg.is_straight() {
                path.line_to(b);
            } else {
                path.curve_to(
                    Point::new(a.x + seg.ta[0], a.y + seg.ta[1]),
                    Point::new(b.x + seg.tb[0], b.y + seg.tb[1]),
                    b,
                );
            }
            last = Some(seg.b);
        }
        path
    }

    /// Bounds of the network geometry, or a zero rect when empty.
    pub fn bounds(&self) -> Rect {
        if self.segments.is_empty() {
            let mut iter = self.vertices.iter().map(|v| Point::new(v[0], v[1]));
            return match iter.next() {
                Some(first) => iter.fold(Rect::from_points(first, first), |r, p| r.union_pt(p)),
                None => Rect::ZERO,
            };
        }
        self.to_bez_path().bounding_box()
    }
}

/// A stop on a variable stroke width profile. `u` is the normalized position
/// along the path, `r` the half width at that point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WidthStop {
    pub u: f64,
    pub r: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableWidthProfile {
    pub base: f64,
    pub stops: Vec<WidthStop>,
}

impl VariableWidthProfile {
    /// Insert a stop keeping stops sorted by `u`; an existing stop at the same
    /// position is replaced.
    pub fn set_stop(&mut self, stop: WidthStop) {
        let u = stop.u.clamp(0.0, 1.0);
        let stop = WidthStop { u, r: stop.r.max(0.0) };
        match self.stops.iter().position(|s| (s.u - u).abs() < 1e-6) {
            Some(i) => self.stops[i] = stop,
            None => {
                let at = self.stops.iter().position(|s| s.u > u).unwrap_or(self.stops.len());
                self.stops.insert(at, stop);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorData {
    pub network: VectorNetwork,
    #[serde(default)]
    pub fill_rule: FillRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Rgba32F>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_profile: Option<VariableWidthProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSpec {
    pub family: String,
    pub size: f64,
    #[serde(default = "FontSpec::default_weight")]
    pub weight: u16,
}

impl FontSpec {
    fn default_weight() -> u16 {
        400
    }
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: "Inter".to_string(),
            size: 14.0,
            weight: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<u16>,
    #[serde(default)]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Rgba32F>,
}

/// Style override for the character range `start..end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyledSegment {
    pub start: usize,
    pub end: usize,
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
    #[serde(default)]
    pub font: FontSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<StyledSegment>,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

/// Raster image referencing an asset by content hash.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageData {
    pub image_ref: String,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    pub component_id: NodeId,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanOperation {
    #[default]
    Union,
    Intersection,
    Difference,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BooleanData {
    pub op: BooleanOperation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_json_shape() {
        let node = Node::new("0-1", NodeKind::Rectangle(BoxData::new(100.0, 50.0)));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "rectangle");
        assert_eq!(json["width"], 100.0);
        assert_eq!(json["active"], true);
        assert!(json.get("children").is_none());
    }

    #[test]
    fn test_node_defaults_on_parse() {
        let json = r#"{"id":"a","type":"group"}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind, NodeKind::Group);
        assert!(node.visible);
        assert!(!node.locked);
        assert!(node.relative_transform.is_identity());
    }

    #[test]
    fn test_scene_payload_parse() {
        let json = r#"{
            "id": "main",
            "type": "scene",
            "constraints": {"children": "single"},
            "guides": [{"axis": "x", "offset": 12.5}],
            "background_color": {"r": 1.0, "g": 1.0, "b": 1.0, "a": 1.0}
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        let NodeKind::Scene(scene) = node.kind else {
            panic!("expected scene");
        };
        assert_eq!(scene.constraints.children, ChildrenConstraint::Single);
        assert_eq!(scene.guides.len(), 1);
        assert_eq!(scene.background_color, Some(Rgba32F::WHITE));
    }

    #[test]
    fn test_accepts_children() {
        assert!(NodeKind::Group.accepts_children());
        assert!(NodeKind::Container(BoxData::default()).accepts_children());
        assert!(!NodeKind::Rectangle(BoxData::default()).accepts_children());
        assert!(!NodeKind::Text(TextData::default()).accepts_children());
    }

    #[test]
    fn test_vector_network_bounds() {
        let net = VectorNetwork::polygon(&[
            Point::new(10.0, 10.0),
            Point::new(30.0, 10.0),
            Point::new(30.0, 40.0),
        ]);
        assert_eq!(net.segments.len(), 3);
        assert_eq!(net.bounds(), Rect::new(10.0, 10.0, 30.0, 40.0));
    }

    #[test]
    fn test_delete_vertices_reindexes() {
        let mut net = VectorNetwork::polyline(&[
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        ]);
        net.delete_vertices(&[0]);
        assert_eq!(net.vertices.len(), 2);
        assert_eq!(net.segments, vec![VectorSegment::line(0, 1)]);
    }

    #[test]
    fn test_width_profile_stops_sorted() {
        let mut profile = VariableWidthProfile { base: 2.0, stops: Vec::new() };
        profile.set_stop(WidthStop { u: 0.8, r: 3.0 });
        profile.set_stop(WidthStop { u: 0.2, r: 1.0 });
        profile.set_stop(WidthStop { u: 0.8, r: 5.0 });
        assert_eq!(profile.stops.len(), 2);
        assert!((profile.stops[0].u - 0.2).abs() < 1e-9);
        assert!((profile.stops[1].r - 5.0).abs() < 1e-9);
    }
}
