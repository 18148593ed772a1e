//! Geometry primitives shared by the atlas, the material compiler and the renderer.
//!
//! Pixel space (device pixels, integer) uses euclid types tagged with [`PixelUnit`]. Render space
//! (logical units, `f64`) uses [`Rect`], [`Point`] and [`Size`].

mod color;
mod rect;

pub use color::*;
pub use rect::*;

pub trait Contains<Other> {
    fn contains(&self, other: Other) -> bool;
}

pub struct PixelUnit;
pub type SizePx = euclid::Size2D<u32, PixelUnit>;
pub type PointPx = euclid::Point2D<i32, PixelUnit>;
pub type BoxPx = euclid::Box2D<i32, PixelUnit>;
