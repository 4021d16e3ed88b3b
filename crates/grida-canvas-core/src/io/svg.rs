//! SVG import.
//!
//! The SVG is parsed and normalized by `usvg`, which resolves styles and
//! turns every basic shape (`rect`, `circle`, `ellipse`, `line`, `polygon`)
//! into a path. Each path becomes a vector node inside one container sized
//! to the SVG viewport. Text and raster images are skipped.

use kurbo::{Affine, Point};
use thiserror::Error;
use usvg::tiny_skia_path::PathSegment;

use crate::color::Rgba32F;
use crate::document::Fragment;
use crate::math::Transform;
use crate::node::{
    BoxData, FillRule, Node, NodeId, NodeKind, VectorData, VectorNetwork, VectorSegment,
};

#[derive(Debug, Error)]
pub enum SvgError {
    #[error("invalid svg: {0}")]
    Parse(String),
    #[error("svg has no drawable content")]
    Empty,
}

fn map_transform(t: usvg::Transform) -> Transform {
    Transform(Affine::new([
        f64::from(t.sx),
        f64::from(t.ky),
        f64::from(t.kx),
        f64::from(t.sy),
        f64::from(t.tx),
        f64::from(t.ty),
    ]))
}

fn point(p: usvg::tiny_skia_path::Point) -> Point {
    Point::new(f64::from(p.x), f64::from(p.y))
}

/// Incrementally builds a vector network from path segments.
#[derive(Default)]
struct NetworkBuilder {
    network: VectorNetwork,
    current: Option<usize>,
    start: Option<usize>,
}

impl NetworkBuilder {
    fn vertex(&mut self, p: Point) -> usize {
        self.network.vertices.push([p.x, p.y]);
        self.network.vertices.len() - 1
    }

    fn current_point(&self) -> Option<Point> {
        self.current.and_then(|i| self.network.vertex(i))
    }

    fn move_to(&mut self, p: Point) {
        let i = self.vertex(p);
        self.current = Some(i);
        self.start = Some(i);
    }

    fn segment_to(&mut self, p: Point, c1: Option<Point>, c2: Option<Point>) {
        let Some(a) = self.current else {
            self.move_to(p);
            return;
        };
        let pa = self.current_point().unwrap_or(p);
        let b = self.vertex(p);
        let ta = c1.map(|c| [c.x - pa.x, c.y - pa.y]).unwrap_or([0.0, 0.0]);
        let tb = c2.map(|c| [c.x - p.x, c.y - p.y]).unwrap_or([0.0, 0.0]);
        self.network.segments.push(VectorSegment { a, b, ta, tb });
        self.current = Some(b);
    }

    fn close(&mut self) {
        let (Some(current), Some(start)) = (self.current, self.start) else {
            return;
        };
        if current == start {
            return;
        }
        let same_point = self.network.vertex(current) == self.network.vertex(start);
        let last_is_current = current + 1 == self.network.vertices.len();
        match self.network.segments.last_mut() {
            // The path already returned to its start: fold the duplicate vertex.
            Some(last) if same_point && last_is_current && last.b == current => {
                last.b = start;
                self.network.vertices.pop();
            }
            _ => self.network.segments.push(VectorSegment::line(current, start)),
        }
        self.current = Some(start);
    }

    fn push(&mut self, segment: PathSegment) {
        match segment {
            PathSegment::MoveTo(p) => self.move_to(point(p)),
            PathSegment::LineTo(p) => self.segment_to(point(p), None, None),
            PathSegment::QuadTo(c, p) => {
                let (c, p) = (point(c), point(p));
                let p0 = self.current_point().unwrap_or(c);
                let c1 = p0 + (c - p0) * (2.0 / 3.0);
                let c2 = p + (c - p) * (2.0 / 3.0);
                self.segment_to(p, Some(c1), Some(c2));
            }
            PathSegment::CubicTo(c1, c2, p) => {
                self.segment_to(point(p), Some(point(c1)), Some(point(c2)))
            }
            PathSegment::Close => self.close(),
        }
    }
}

struct Importer {
    nodes: Vec<Node>,
    children: Vec<NodeId>,
}

impl Importer {
    fn next_id(&self) -> NodeId {
        NodeId(format!("svg-{}", self.nodes.len() + 1))
    }

    fn group(&mut self, group: &usvg::Group) {
        for child in group.children() {
            match child {
                usvg::Node::Group(g) => self.group(g),
                usvg::Node::Path(path) => self.path(path),
                usvg::Node::Image(_) | usvg::Node::Text(_) => {
                    log::debug!("svg import skips images and text");
                }
            }
        }
    }

    fn path(&mut self, path: &usvg::Path) {
        let mut builder = NetworkBuilder::default();
        for segment in path.data().segments() {
            builder.push(segment);
        }
        if builder.network.vertices.is_empty() {
            return;
        }
        let (fill, fill_rule) = match path.fill() {
            Some(fill) => {
                let color = match fill.paint() {
                    usvg::Paint::Color(c) => {
                        let alpha = (fill.opacity().get() * 255.0).round() as u8;
                        Some(Rgba32F::from_srgb8(c.red, c.green, c.blue, alpha))
                    }
                    _ => None,
                };
                let rule = match fill.rule() {
                    usvg::FillRule::NonZero => FillRule::Nonzero,
                    usvg::FillRule::EvenOdd => FillRule::Evenodd,
                };
                (color, rule)
            }
            None => (None, FillRule::Nonzero),
        };
        let id = self.next_id();
        let mut node = Node::new(
            id.clone(),
            NodeKind::Vector(VectorData {
                network: builder.network,
                fill_rule,
                fill,
                width_profile: None,
            }),
        )
        .with_transform(map_transform(path.abs_transform()));
        if !path.id().is_empty() {
            node.name = path.id().to_string();
        }
        node.visible = path.is_visible();
        self.nodes.push(node);
        self.children.push(id);
    }
}

/// Convert an SVG document into a fragment: one container holding a vector
/// node per path.
pub fn create_node_from_svg(svg: &str) -> Result<Fragment, SvgError> {
    let tree = usvg::Tree::from_str(svg, &usvg::Options::default())
        .map_err(|e| SvgError::Parse(e.to_string()))?;
    let mut importer = Importer {
        nodes: Vec::new(),
        children: Vec::new(),
    };
    importer.group(tree.root());
    if importer.nodes.is_empty() {
        return Err(SvgError::Empty);
    }

    let size = tree.size();
    let root_id = NodeId::from("svg-0");
    let root = Node::new(
        root_id.clone(),
        NodeKind::Container(BoxData::new(f64::from(size.width()), f64::from(size.height()))),
    )
    .with_name("svg")
    .with_children(importer.children);

    let mut nodes = importer.nodes;
    nodes.push(root);
    Ok(Fragment::from_nodes(vec![root_id], nodes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_becomes_closed_vector() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="50">
            <rect x="10" y="10" width="20" height="30" fill="#ff0000"/>
        </svg>"##;
        let fragment = create_node_from_svg(svg).unwrap();
        fragment.check().unwrap();
        let root = &fragment.nodes[&fragment.roots[0]];
        let NodeKind::Container(b) = &root.kind else {
            panic!("expected container");
        };
        assert_eq!((b.width, b.height), (100.0, 50.0));
        assert_eq!(root.children.len(), 1);

        let NodeKind::Vector(v) = &fragment.nodes[&root.children[0]].kind else {
            panic!("expected vector");
        };
        assert_eq!(v.network.vertices.len(), 4);
        assert_eq!(v.network.segments.len(), 4);
        assert_eq!(v.fill.map(|f| f.to_srgb8()), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_shapes_are_imported() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64">
            <circle cx="32" cy="32" r="10"/>
            <ellipse cx="10" cy="10" rx="5" ry="3"/>
            <line x1="0" y1="0" x2="64" y2="64" stroke="black"/>
            <path d="M0 0 L10 0 L10 10 Z"/>
        </svg>"#;
        let fragment = create_node_from_svg(svg).unwrap();
        let root = &fragment.nodes[&fragment.roots[0]];
        assert_eq!(root.children.len(), 4);
        let NodeKind::Vector(line) = &fragment.nodes[&root.children[2]].kind else {
            panic!("expected vector");
        };
        assert_eq!(line.network.segments.len(), 1);
    }

    #[test]
    fn test_invalid_svg() {
        assert!(matches!(create_node_from_svg("<svg"), Err(SvgError::Parse(_))));
        let empty = r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"/>"#;
        assert!(matches!(create_node_from_svg(empty), Err(SvgError::Empty)));
    }
}
