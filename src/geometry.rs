//! Pure coordinate conversions between tile-local, frame-absolute,
//! content-absolute, viewport-relative, and display spaces.

use serde::Serialize;

use crate::core::ViewportState;

/// Axis-aligned box with exclusive bottom-right corner. Valid boxes satisfy
/// `x2 > x1` and `y2 > y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_valid(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    pub fn scale(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// A sub-rectangle of a frame, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

pub fn tile_to_frame(bounds: BoundingBox, tile: &TileRect) -> BoundingBox {
    bounds.translate(tile.x as f32, tile.y as f32)
}

pub fn frame_to_tile(bounds: BoundingBox, tile: &TileRect) -> BoundingBox {
    bounds.translate(-(tile.x as f32), -(tile.y as f32))
}

pub fn frame_to_content(bounds: BoundingBox, capture: &ViewportState) -> BoundingBox {
    bounds.translate(capture.scroll_x, capture.scroll_y)
}

pub fn content_to_frame(bounds: BoundingBox, capture: &ViewportState) -> BoundingBox {
    bounds.translate(-capture.scroll_x, -capture.scroll_y)
}

pub fn content_to_viewport(bounds: BoundingBox, current: &ViewportState) -> BoundingBox {
    bounds.translate(-current.scroll_x, -current.scroll_y)
}

pub fn viewport_to_content(bounds: BoundingBox, current: &ViewportState) -> BoundingBox {
    bounds.translate(current.scroll_x, current.scroll_y)
}

pub fn viewport_to_display(bounds: BoundingBox, viewport: &ViewportState) -> BoundingBox {
    bounds.scale(viewport.scale)
}

pub fn display_to_viewport(bounds: BoundingBox, viewport: &ViewportState) -> BoundingBox {
    if viewport.scale > 0.0 {
        bounds.scale(1.0 / viewport.scale)
    } else {
        bounds
    }
}

/// Clamps a viewport-relative box to the visible `[0, width] x [0, height]`
/// area. Boxes with no visible part, or that degenerate under clamping, are
/// dropped.
pub fn clip_to_viewport(bounds: BoundingBox, viewport: &ViewportState) -> Option<BoundingBox> {
    if !bounds.is_valid() {
        return None;
    }
    if bounds.x2 <= 0.0
        || bounds.y2 <= 0.0
        || bounds.x1 >= viewport.width
        || bounds.y1 >= viewport.height
    {
        return None;
    }
    let clipped = BoundingBox {
        x1: bounds.x1.clamp(0.0, viewport.width),
        y1: bounds.y1.clamp(0.0, viewport.height),
        x2: bounds.x2.clamp(0.0, viewport.width),
        y2: bounds.y2.clamp(0.0, viewport.height),
    };
    clipped.is_valid().then_some(clipped)
}
