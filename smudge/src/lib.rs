//! Renders texts as animated, GPU shaded imagery.
//!
//! A [`Smudge`] owns a set of [`Text`]s and a [`Material`]. Whenever either changes, all texts are
//! rasterized and packed into one atlas, the material is compiled against that atlas, and the
//! result replaces the previous one at once. Each text gets a [`RenderScope`] that plays its
//! animation independently, while all texts are drawn with a single program.

mod error;
mod event;
mod options;
mod pipeline;
mod scope;
mod smudge;

pub use error::*;
pub use event::*;
pub use options::*;
pub use scope::RenderScope;
pub use smudge::Smudge;

pub use smudge_atlas::{
    CosmicRasterizer, FontStyle, GrowingPacker, Mapping, MappingBuilder, RectPacker, RgbaImage,
    Text, TextEvent, TextId, TextProperties, TextRasterizer, TextSnapshot,
};
pub use smudge_geometry::{Color, Rect};
pub use smudge_material::{
    MappingMaterial, Material, MaterialEvent, ShaderMaterial, Uniform, UniformKind, UniformValue,
};
pub use smudge_renderer::{
    Capabilities, FrameTiming, GpuBackend, GpuContext, HeadlessBackend, Renderer, WgpuBackend,
};
pub use smudge_util::SubscriptionId;
