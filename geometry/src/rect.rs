use std::ops::{Add, Sub};

use crate::{BoxPx, Contains};

/// A position in render space.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

impl Add<Size> for Point {
    type Output = Point;

    fn add(self, rhs: Size) -> Self::Output {
        Point::new(self.x + rhs.width, self.y + rhs.height)
    }
}

impl Sub for Point {
    type Output = Size;

    fn sub(self, rhs: Self) -> Self::Output {
        Size::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl From<(f64, f64)> for Size {
    fn from((width, height): (f64, f64)) -> Self {
        Size::new(width, height)
    }
}

/// Where a text appears in render space: its device pixel placement divided by the device pixel
/// ratio.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub const ZERO: Self = Self {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    #[must_use]
    pub fn new(origin: impl Into<Point>, size: impl Into<Size>) -> Self {
        let origin = origin.into();
        let end = origin + size.into();
        Self {
            left: origin.x,
            top: origin.y,
            right: end.x,
            bottom: end.y,
        }
    }

    /// Converts a device pixel box by dividing through `ratio`.
    pub fn from_pixels(b: &BoxPx, ratio: f64) -> Self {
        debug_assert!(ratio > 0.0);
        Self {
            left: b.min.x as f64 / ratio,
            top: b.min.y as f64 / ratio,
            right: b.max.x as f64 / ratio,
            bottom: b.max.y as f64 / ratio,
        }
    }

    pub fn is_empty(&self) -> bool {
        // Also true if any value is NaN.
        !(self.left < self.right && self.top < self.bottom)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn size(&self) -> Size {
        Point::new(self.right, self.bottom) - self.origin()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left.max(other.left) < self.right.min(other.right)
            && self.top.max(other.top) < self.bottom.min(other.bottom)
    }
}

impl Contains<Point> for Rect {
    fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x < self.right && p.y >= self.top && p.y < self.bottom
    }
}
