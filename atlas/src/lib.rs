//! Turns a set of texts into a single packed atlas image and a [`Mapping`] describing where each
//! text ended up.

mod image;
mod mapping;
mod mapping_builder;
mod packer;
mod rasterizer;
mod text;

pub use image::*;
pub use mapping::*;
pub use mapping_builder::*;
pub use packer::*;
pub use rasterizer::*;
pub use text::*;
