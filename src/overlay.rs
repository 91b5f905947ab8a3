//! Overlay rendering: the reference annotation and the participant's line on
//! top of the frozen frame.
//!
//! [`compose`] rebuilds the whole scene from its inputs on every call and
//! keeps nothing between calls, so it is safe to run on every pointer move.

use eframe::egui;

use crate::coords::{denormalize, raster_to_client, DisplayRect, Point, RasterSize};
use crate::input::UserLine;
use crate::reference::ReferenceAnnotation;

// ── Style ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color4 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4 {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_egui(&self) -> egui::Color32 {
        egui::Color32::from_rgba_unmultiplied(
            (self.r * 255.0) as u8,
            (self.g * 255.0) as u8,
            (self.b * 255.0) as u8,
            (self.a * 255.0) as u8,
        )
    }
}

pub const REFERENCE_COLOR: Color4 = Color4::rgba(0.0, 1.0, 0.0, 0.7);
/// `#38bdf8`
pub const USER_COLOR: Color4 = Color4::rgba(56.0 / 255.0, 189.0 / 255.0, 248.0 / 255.0, 1.0);
pub const REFERENCE_DASH: [f32; 2] = [8.0, 6.0];
pub const USER_WIDTH: f32 = 4.0;
pub const MARKER_RADIUS: f32 = 6.0;

/// Reference stroke width scales with the frame so it stays visible on large
/// clips, with a 2 px floor.
pub fn reference_width(size: RasterSize) -> f32 {
    (size.width as f32 * 0.005).max(2.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub color: Color4,
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub round: bool,
}

// ── Scene ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum OverlayShape {
    /// Points in raster pixels.
    Path { points: Vec<Point>, style: StrokeStyle },
    Marker { center: Point, radius: f32, color: Color4 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayScene {
    pub size: RasterSize,
    pub shapes: Vec<OverlayShape>,
}

impl OverlayScene {
    pub fn reference_paths(&self) -> usize {
        self.shapes
            .iter()
            .filter(|s| matches!(s, OverlayShape::Path { style, .. } if style.dash.is_some()))
            .count()
    }

    pub fn user_paths(&self) -> usize {
        self.shapes
            .iter()
            .filter(|s| matches!(s, OverlayShape::Path { style, .. } if style.dash.is_none()))
            .count()
    }
}

/// Build the scene: reference lines first, the user's line on top.
pub fn compose(
    size: RasterSize,
    reference: Option<&ReferenceAnnotation>,
    line: Option<&UserLine>,
) -> OverlayScene {
    let mut shapes = Vec::new();

    if let Some(reference) = reference {
        let style = StrokeStyle {
            color: REFERENCE_COLOR,
            width: reference_width(size),
            dash: Some(REFERENCE_DASH),
            round: false,
        };
        for ref_line in &reference.lines {
            shapes.push(OverlayShape::Path {
                points: ref_line.points.iter().map(|p| denormalize(*p, size)).collect(),
                style,
            });
        }
    }

    if let Some(line) = line {
        let points = line.points();
        if !points.is_empty() {
            shapes.push(OverlayShape::Path {
                points,
                style: StrokeStyle {
                    color: USER_COLOR,
                    width: USER_WIDTH,
                    dash: None,
                    round: true,
                },
            });
        }
        if let UserLine::Segment { start, end } = line {
            for center in [*start, *end] {
                shapes.push(OverlayShape::Marker {
                    center,
                    radius: MARKER_RADIUS,
                    color: USER_COLOR,
                });
            }
        }
    }

    OverlayScene { size, shapes }
}

// ── egui painting ───────────────────────────────────────────────────────────

fn to_pos(p: Point) -> egui::Pos2 {
    egui::pos2(p.x, p.y)
}

/// Paint `scene` over the frame shown at `image_rect`.
pub fn paint(scene: &OverlayScene, painter: &egui::Painter, image_rect: egui::Rect) {
    let display = DisplayRect {
        left: image_rect.min.x,
        top: image_rect.min.y,
        width: image_rect.width(),
        height: image_rect.height(),
    };
    let scale = if scene.size.width > 0 {
        display.width / scene.size.width as f32
    } else {
        1.0
    };
    let screen = |p: &Point| to_pos(raster_to_client(*p, display, scene.size));

    for shape in &scene.shapes {
        match shape {
            OverlayShape::Path { points, style } => {
                let pts: Vec<egui::Pos2> = points.iter().map(screen).collect();
                let stroke = egui::Stroke::new(style.width * scale, style.color.to_egui());
                match style.dash {
                    Some([dash, gap]) => {
                        painter.extend(egui::Shape::dashed_line(
                            &pts,
                            stroke,
                            dash * scale,
                            gap * scale,
                        ));
                    }
                    None => {
                        painter.add(egui::Shape::line(pts.clone(), stroke));
                    }
                }
                // egui strokes have butt ends; discs at the vertices give
                // round caps and joins
                if style.round {
                    for p in &pts {
                        painter.circle_filled(*p, stroke.width * 0.5, stroke.color);
                    }
                }
            }
            OverlayShape::Marker { center, radius, color } => {
                painter.circle_filled(screen(center), radius * scale, color.to_egui());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceLine;

    fn reference() -> ReferenceAnnotation {
        ReferenceAnnotation {
            lines: vec![ReferenceLine {
                points: vec![Point::new(0.5, 0.25), Point::new(1.0, 1.0)],
            }],
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_inputs_give_empty_scene() {
        let scene = compose(RasterSize::new(640, 360), None, None);
        assert!(scene.shapes.is_empty());
    }

    #[test]
    fn reference_is_dashed_and_scaled_to_raster() {
        let scene = compose(RasterSize::new(640, 360), Some(&reference()), None);
        assert_eq!(scene.reference_paths(), 1);
        assert_eq!(scene.user_paths(), 0);
        let OverlayShape::Path { points, style } = &scene.shapes[0] else {
            panic!("expected a path");
        };
        assert_eq!(points[0], Point::new(320.0, 90.0));
        assert_eq!(points[1], Point::new(640.0, 360.0));
        assert_eq!(style.dash, Some(REFERENCE_DASH));
        assert!((style.width - 3.2).abs() < 1e-4);
    }

    #[test]
    fn reference_width_has_floor() {
        assert_eq!(reference_width(RasterSize::new(100, 100)), 2.0);
        assert!((reference_width(RasterSize::new(1920, 1080)) - 9.6).abs() < 1e-4);
    }

    #[test]
    fn segment_gets_endpoint_markers() {
        let line = UserLine::Segment {
            start: Point::new(100.0, 100.0),
            end: Point::new(300.0, 200.0),
        };
        let scene = compose(RasterSize::new(640, 360), Some(&reference()), Some(&line));
        assert_eq!(scene.reference_paths(), 1);
        assert_eq!(scene.user_paths(), 1);
        let markers = scene
            .shapes
            .iter()
            .filter(|s| matches!(s, OverlayShape::Marker { .. }))
            .count();
        assert_eq!(markers, 2);
        // user line is drawn last, on top
        assert!(matches!(&scene.shapes[1], OverlayShape::Path { style, .. } if style.round));
    }

    #[test]
    fn polyline_has_no_markers() {
        let line = UserLine::Polyline(vec![
            Point::new(1.0, 1.0),
            Point::new(5.0, 5.0),
            Point::new(9.0, 1.0),
        ]);
        let scene = compose(RasterSize::new(10, 10), None, Some(&line));
        assert_eq!(scene.shapes.len(), 1);
    }

    #[test]
    fn compose_is_stateless() {
        let line = UserLine::Segment {
            start: Point::new(1.0, 1.0),
            end: Point::new(50.0, 1.0),
        };
        let size = RasterSize::new(64, 36);
        let a = compose(size, Some(&reference()), Some(&line));
        let b = compose(size, Some(&reference()), Some(&line));
        assert_eq!(a, b);
        let cleared = compose(size, Some(&reference()), None);
        assert_eq!(cleared.reference_paths(), 1);
        assert_eq!(cleared.user_paths(), 0);
    }
}
