use serde::{Deserialize, Serialize};

/// Axis-aligned face locator within an image, in pixels, clamped to the
/// image bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a region from a floating-point `[x1, y1, x2, y2]` box,
    /// clamped to a `frame_w` × `frame_h` image.
    pub fn from_bbox(bbox: [f64; 4], frame_w: u32, frame_h: u32) -> Self {
        let fw = frame_w as i32;
        let fh = frame_h as i32;
        let x1 = (bbox[0].floor() as i32).clamp(0, fw);
        let y1 = (bbox[1].floor() as i32).clamp(0, fh);
        let x2 = (bbox[2].ceil() as i32).clamp(0, fw);
        let y2 = (bbox[3].ceil() as i32).clamp(0, fh);
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0),
            height: (y2 - y1).max(0),
        }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn iou(&self, other: &Region) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);

        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        let area_a = self.area() as f64;
        let area_b = other.area() as f64;
        inter / (area_a + area_b - inter)
    }
}
