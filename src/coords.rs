//! Pixel ↔ unit coordinate conversion.
//!
//! Raster pixel coordinates are tied to the size of the captured frame. Unit
//! coordinates are fractions of that size and survive any resize, so lines are
//! stored in pixels while drawing and converted to unit space at the edges.

use serde::{Deserialize, Serialize};

// ── Geometry ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Width and height of a raster in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterSize {
    pub width: u32,
    pub height: u32,
}

impl RasterSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where the raster is currently displayed, in viewport space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl DisplayRect {
    /// Largest rect with the raster's aspect ratio that fits inside `outer`,
    /// centered (CSS `background-size: contain`).
    pub fn contain(outer: DisplayRect, size: RasterSize) -> DisplayRect {
        if size.is_empty() || outer.width <= 0.0 || outer.height <= 0.0 {
            return outer;
        }
        let scale = (outer.width / size.width as f32).min(outer.height / size.height as f32);
        let width = size.width as f32 * scale;
        let height = size.height as f32 * scale;
        DisplayRect {
            left: outer.left + (outer.width - width) * 0.5,
            top: outer.top + (outer.height - height) * 0.5,
            width,
            height,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left
            && p.x <= self.left + self.width
            && p.y >= self.top
            && p.y <= self.top + self.height
    }
}

// ── Conversions ─────────────────────────────────────────────────────────────

pub fn normalize(p: Point, size: RasterSize) -> Point {
    if size.is_empty() {
        return Point::default();
    }
    Point {
        x: p.x / size.width as f32,
        y: p.y / size.height as f32,
    }
}

pub fn denormalize(p: Point, size: RasterSize) -> Point {
    Point {
        x: p.x * size.width as f32,
        y: p.y * size.height as f32,
    }
}

/// Map a viewport position onto raster pixels using the displayed-size to
/// raster-size ratio, so on-screen scaling does not change the result.
pub fn client_to_raster(client: Point, display: DisplayRect, size: RasterSize) -> Point {
    if display.width <= 0.0 || display.height <= 0.0 {
        return Point::default();
    }
    Point {
        x: (client.x - display.left) / display.width * size.width as f32,
        y: (client.y - display.top) / display.height * size.height as f32,
    }
}

/// Inverse of [`client_to_raster`].
pub fn raster_to_client(p: Point, display: DisplayRect, size: RasterSize) -> Point {
    if size.is_empty() {
        return Point::new(display.left, display.top);
    }
    Point {
        x: display.left + p.x / size.width as f32 * display.width,
        y: display.top + p.y / size.height as f32 * display.height,
    }
}

/// Total length of a polyline in whatever space its points live in.
pub fn path_length(points: &[Point]) -> f32 {
    points.windows(2).map(|w| w[0].distance_to(w[1])).sum()
}
