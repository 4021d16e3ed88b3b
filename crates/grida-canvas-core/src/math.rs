//! Geometry kernel: affine transforms, bounding boxes and hit testing.

use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 2D affine transform.
///
/// Serialized as the row-major 2x3 matrix `[[a, c, tx], [b, d, ty]]`, which is
/// the shape documents use for `relative_transform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub Affine);

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform(Affine::IDENTITY);

    pub fn translate(delta: Vec2) -> Self {
        Self(Affine::translate(delta))
    }

    pub fn scale(factor: f64) -> Self {
        Self(Affine::scale(factor))
    }

    /// `self` applied after `child`, i.e. the world transform of a child whose
    /// parent transform is `self`.
    pub fn compose(&self, child: &Transform) -> Transform {
        Transform(self.0 * child.0)
    }

    pub fn invert(&self) -> Transform {
        Transform(self.0.inverse())
    }

    pub fn apply(&self, point: Point) -> Point {
        self.0 * point
    }

    pub fn translation(&self) -> Vec2 {
        let c = self.0.as_coeffs();
        Vec2::new(c[4], c[5])
    }

    /// The same transform moved by `delta` in parent space.
    pub fn translated(&self, delta: Vec2) -> Transform {
        Transform(Affine::translate(delta) * self.0)
    }

    pub fn with_translation(&self, translation: Vec2) -> Transform {
        let c = self.0.as_coeffs();
        Transform(Affine::new([c[0], c[1], c[2], c[3], translation.x, translation.y]))
    }

    pub fn is_identity(&self) -> bool {
        self.0 == Affine::IDENTITY
    }

    pub fn as_rows(&self) -> [[f64; 3]; 2] {
        let [a, b, c, d, e, f] = self.0.as_coeffs();
        [[a, c, e], [b, d, f]]
    }

    pub fn from_rows(rows: [[f64; 3]; 2]) -> Self {
        let [[a, c, e], [b, d, f]] = rows;
        Self(Affine::new([a, b, c, d, e, f]))
    }
}

impl Serialize for Transform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_rows().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = <[[f64; 3]; 2]>::deserialize(deserializer)?;
        Ok(Self::from_rows(rows))
    }
}

/// Axis-aligned bounds of a local `size` box placed by `transform`.
pub fn bbox(transform: &Transform, size: Size) -> Rect {
    transform.0.transform_rect_bbox(Rect::from_origin_size(Point::ZERO, size))
}

/// Union of all rects, or `None` for an empty iterator.
pub fn union_all(rects: impl IntoIterator<Item = Rect>) -> Option<Rect> {
    rects.into_iter().reduce(|acc, r| acc.union(r))
}

/// Whether `point` lies inside `rect` grown by `tolerance`.
pub fn hit_rect(rect: Rect, point: Point, tolerance: f64) -> bool {
    rect.inflate(tolerance, tolerance).contains(point)
}

pub fn rect_intersects(a: Rect, b: Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}

/// Whether `outer` fully contains `inner`.
pub fn rect_contains(outer: Rect, inner: Rect) -> bool {
    outer.x0 <= inner.x0 && outer.y0 <= inner.y0 && outer.x1 >= inner.x1 && outer.y1 >= inner.y1
}

pub fn pad(rect: Rect, margin: f64) -> Rect {
    rect.inflate(margin, margin)
}

/// Even-odd point in polygon test.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Scale and translation that fit `bounds` inside `viewport` with `margin` on
/// every side. The scale is uniform, so the aspect ratio is preserved.
///
/// Degenerate bounds are treated as one unit wide so a point or a horizontal
/// line still produces a finite zoom.
pub fn fit_transform(bounds: Rect, viewport: Size, margin: f64) -> (f64, Vec2) {
    let avail = Size::new(
        (viewport.width - margin * 2.0).max(1.0),
        (viewport.height - margin * 2.0).max(1.0),
    );
    let width = bounds.width().max(1.0);
    let height = bounds.height().max(1.0);
    let zoom = (avail.width / width).min(avail.height / height);
    let center = bounds.center();
    let offset = Vec2::new(
        viewport.width / 2.0 - center.x * zoom,
        viewport.height / 2.0 - center.y * zoom,
    );
    (zoom, offset)
}
