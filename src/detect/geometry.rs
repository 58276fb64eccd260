//! Box representations and overlap.
//!
//! The model emits center-form boxes; everything downstream of decoding works
//! on corner-form boxes with `x1 <= x2` and `y1 <= y2`.

use serde::Serialize;

/// Added to the IoU denominator so zero-area boxes do not divide by zero.
pub const IOU_EPSILON: f32 = 1e-6;

/// Center-form box: center x/y plus width/height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CenterBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// Corner-form box: top-left and bottom-right corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(into = "[f32; 4]")]
pub struct CornerBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl CenterBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Convert to corner form. Negative extents are treated as their magnitude.
    pub fn to_corners(self) -> CornerBox {
        let half_w = self.w.abs() / 2.0;
        let half_h = self.h.abs() / 2.0;
        CornerBox {
            x1: self.cx - half_w,
            y1: self.cy - half_h,
            x2: self.cx + half_w,
            y2: self.cy + half_h,
        }
    }
}

impl CornerBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn to_center(self) -> CenterBox {
        CenterBox {
            cx: (self.x1 + self.x2) / 2.0,
            cy: (self.y1 + self.y2) / 2.0,
            w: self.x2 - self.x1,
            h: self.y2 - self.y1,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &CornerBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection over union with `IOU_EPSILON` in the denominator.
    pub fn iou(&self, other: &CornerBox) -> f32 {
        let inter = self.intersection_area(other);
        inter / (self.area() + other.area() - inter + IOU_EPSILON)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<CornerBox> for [f32; 4] {
    fn from(b: CornerBox) -> Self {
        b.to_array()
    }
}
