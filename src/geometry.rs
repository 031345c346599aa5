//! Small value types for screen and client-area coordinates.
//!
//! The panel's regions and click targets are configured either as
//! percentages of the window's client area (survives resizes and DPI
//! changes) or as absolute client-relative pixels. Everything converts to
//! screen pixels only at the last moment, against a live client size and
//! origin.

use serde::{Deserialize, Serialize};

/// A point in screen pixels (or client-relative pixels, by context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// An axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn right(&self) -> i32 {
        self.x + self.w as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h as i32
    }
}

/// A rectangle expressed as fractions (0.0..=1.0) of a client area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionPct {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RegionPct {
    /// Resolve against a client size into client-relative pixels.
    pub fn to_client_rect(&self, client_w: u32, client_h: u32) -> Rect {
        Rect {
            x: (self.x * client_w as f64) as i32,
            y: (self.y * client_h as f64) as i32,
            w: (self.w * client_w as f64) as u32,
            h: (self.h * client_h as f64) as u32,
        }
    }

    pub fn in_range(&self) -> bool {
        [self.x, self.y, self.w, self.h]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

/// A point expressed as fractions (0.0..=1.0) of a client area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPct {
    pub x: f64,
    pub y: f64,
}

impl PointPct {
    /// Resolve to absolute screen coordinates given the client size and the
    /// client area's screen origin.
    pub fn to_screen(&self, client_w: u32, client_h: u32, origin: Point) -> Point {
        Point {
            x: origin.x + (self.x * client_w as f64) as i32,
            y: origin.y + (self.y * client_h as f64) as i32,
        }
    }

    pub fn in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}
