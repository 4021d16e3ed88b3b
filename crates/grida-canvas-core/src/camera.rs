//! Camera module for pan/zoom transforms.

use std::str::FromStr;

use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

use crate::config::EditorConfig;
use crate::math;
use crate::node::NodeId;

/// Where a zoom change is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAnchor {
    /// The viewport centre keeps its document position.
    Center,
    /// This document-space point keeps its screen position.
    Point(Point),
}

/// What `fit` should frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitTarget {
    /// Everything in the active scene (`"*"`).
    All,
    Selection,
    Node(NodeId),
}

impl FromStr for FitTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" => FitTarget::All,
            "selection" => FitTarget::Selection,
            id => FitTarget::Node(NodeId::from(id)),
        })
    }
}

/// Camera manages the view transform for the canvas.
///
/// The view transform is `translate(offset) * scale(zoom)`, mapping document
/// space to screen space. It is applied after node transforms and never
/// stored in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Current translation offset (pan)
    pub offset: Vec2,
    /// Current zoom level, 1.0 = 100%
    pub zoom: f64,
    pub viewport: Size,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Factor applied by `zoom_in` / `zoom_out`.
    pub zoom_step: f64,
    /// Screen-space margin kept around fitted content.
    pub fit_margin: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&EditorConfig::default())
    }
}

impl Camera {
    /// Create a new camera with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
            viewport: config.viewport,
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            zoom_step: config.zoom_step,
            fit_margin: config.fit_margin,
        }
    }

    /// Get the affine transform for rendering.
    ///
    /// This transform converts world coordinates to screen coordinates.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.zoom)
    }

    /// Get the inverse transform for input handling.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.offset)
    }

    /// Set the view transform directly. Only uniform scale + translation is
    /// kept.
    pub fn set_transform(&mut self, transform: Affine) {
        let [a, _, _, _, e, f] = transform.as_coeffs();
        self.zoom = a.clamp(self.min_zoom, self.max_zoom);
        self.offset = Vec2::new(e, f);
    }

    /// Convert a screen point to world coordinates.
    pub fn screen_to_world(&self, screen_point: Point) -> Point {
        self.inverse_transform() * screen_point
    }

    /// Convert a world point to screen coordinates.
    pub fn world_to_screen(&self, world_point: Point) -> Point {
        self.transform() * world_point
    }

    /// Document-space rectangle currently visible.
    pub fn visible_rect(&self) -> Rect {
        let a = self.screen_to_world(Point::ZERO);
        let b = self.screen_to_world(Point::new(self.viewport.width, self.viewport.height));
        Rect::from_points(a, b)
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
    }

    /// Pan the camera by a delta in screen coordinates.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Zoom the camera, keeping the given screen point fixed.
    pub fn zoom_at(&mut self, screen_point: Point, factor: f64) {
        let new_zoom = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        if (new_zoom - self.zoom).abs() < f64::EPSILON {
            return;
        }

        let world_point = self.screen_to_world(screen_point);
        self.zoom = new_zoom;

        // Adjust offset so world_point stays at screen_point
        let new_screen = self.world_to_screen(world_point);
        self.offset += screen_point - new_screen;
    }

    fn viewport_center(&self) -> Point {
        Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0)
    }

    pub fn zoom_in(&mut self) {
        self.zoom_at(self.viewport_center(), self.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_at(self.viewport_center(), 1.0 / self.zoom_step);
    }

    /// Set the absolute zoom level, keeping `anchor` in place.
    pub fn scale(&mut self, zoom: f64, anchor: ScaleAnchor) {
        let screen = match anchor {
            ScaleAnchor::Center => self.viewport_center(),
            ScaleAnchor::Point(p) => self.world_to_screen(p),
        };
        if zoom <= 0.0 || !zoom.is_finite() {
            return;
        }
        self.zoom_at(screen, zoom / self.zoom);
    }

    /// Reset camera to the identity transform.
    pub fn reset(&mut self) {
        self.offset = Vec2::ZERO;
        self.zoom = 1.0;
    }

    /// Centre a document-space point in the viewport without changing zoom.
    pub fn center_on(&mut self, point: Point) {
        let center = self.viewport_center();
        self.offset = Vec2::new(center.x - point.x * self.zoom, center.y - point.y * self.zoom);
    }

    /// Fit the camera to show the given bounding box.
    pub fn fit_bounds(&mut self, bounds: Rect) {
        let (zoom, _) = math::fit_transform(bounds, self.viewport, self.fit_margin);
        self.zoom = zoom.clamp(self.min_zoom, self.max_zoom);
        self.center_on(bounds.center());
    }

    /// Zoom so that a screen-space rectangle fills the viewport.
    pub fn zoom_to_rect(&mut self, rect: Rect) {
        if rect.width() < 1.0 || rect.height() < 1.0 {
            return;
        }
        let world = Rect::from_points(
            self.screen_to_world(Point::new(rect.x0, rect.y0)),
            self.screen_to_world(Point::new(rect.x1, rect.y1)),
        );
        let margin = self.fit_margin;
        self.fit_margin = 0.0;
        self.fit_bounds(world);
        self.fit_margin = margin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera() {
        let camera = Camera::new();
        assert_eq!(camera.offset, Vec2::ZERO);
        assert!((camera.zoom - 1.0).abs() < f64::EPSILON);
        assert_eq!(camera.transform(), Affine::IDENTITY);
    }

    #[test]
    fn test_screen_to_world_with_zoom() {
        let mut camera = Camera::new();
        camera.zoom = 2.0;
        let world = camera.screen_to_world(Point::new(100.0, 200.0));
        assert!((world.x - 50.0).abs() < f64::EPSILON);
        assert!((world.y - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_roundtrip_conversion() {
        let mut camera = Camera::new();
        camera.offset = Vec2::new(30.0, -20.0);
        camera.zoom = 1.5;

        let original = Point::new(123.0, 456.0);
        let back = camera.world_to_screen(camera.screen_to_world(original));
        assert!((back.x - original.x).abs() < 1e-10);
        assert!((back.y - original.y).abs() < 1e-10);
    }

    #[test]
    fn test_zoom_clamp() {
        let mut camera = Camera::new();
        camera.zoom_at(Point::ZERO, 1e-9);
        assert!((camera.zoom - camera.min_zoom).abs() < f64::EPSILON);

        camera.zoom_at(Point::ZERO, 1e9);
        assert!((camera.zoom - camera.max_zoom).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zoom_in_keeps_center() {
        let mut camera = Camera::new();
        let center = camera.screen_to_world(Point::new(400.0, 300.0));
        camera.zoom_in();
        assert!((camera.zoom - 2.0).abs() < f64::EPSILON);
        let after = camera.screen_to_world(Point::new(400.0, 300.0));
        assert!((after - center).hypot() < 1e-9);
        camera.zoom_out();
        assert!((camera.zoom - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_around_point() {
        let mut camera = Camera::new();
        let anchor = Point::new(100.0, 100.0);
        let before = camera.world_to_screen(anchor);
        camera.scale(4.0, ScaleAnchor::Point(anchor));
        assert!((camera.zoom - 4.0).abs() < f64::EPSILON);
        assert!((camera.world_to_screen(anchor) - before).hypot() < 1e-9);
    }

    #[test]
    fn test_fit_bounds_preserves_aspect() {
        let mut camera = Camera::new();
        camera.fit_margin = 0.0;
        camera.fit_bounds(Rect::new(0.0, 0.0, 400.0, 100.0));
        assert!((camera.zoom - 2.0).abs() < 1e-9);
        let center = camera.world_to_screen(Point::new(200.0, 50.0));
        assert!((center - Point::new(400.0, 300.0)).hypot() < 1e-9);
    }

    #[test]
    fn test_fit_degenerate_bounds_is_finite() {
        let mut camera = Camera::new();
        camera.fit_bounds(Rect::new(10.0, 10.0, 10.0, 10.0));
        assert!(camera.zoom.is_finite());
        assert!(camera.zoom <= camera.max_zoom);
    }

    #[test]
    fn test_fit_target_parse() {
        assert_eq!("*".parse::<FitTarget>().unwrap(), FitTarget::All);
        assert_eq!("selection".parse::<FitTarget>().unwrap(), FitTarget::Selection);
        assert_eq!(
            "0-4".parse::<FitTarget>().unwrap(),
            FitTarget::Node(NodeId::from("0-4"))
        );
    }

    #[test]
    fn test_pan() {
        let mut camera = Camera::new();
        camera.pan(Vec2::new(10.0, 20.0));
        assert_eq!(camera.offset, Vec2::new(10.0, 20.0));
    }
}
