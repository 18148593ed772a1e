use indexmap::IndexMap;
use smudge_geometry::{BoxPx, Rect, SizePx};

use crate::{RgbaImage, TextId};

/// The layout of an atlas: its size in device pixels and where each text is placed.
///
/// Placements do not overlap, lie within the atlas and keep the order of the texts the mapping
/// was built from. A mapping never changes after it was built.
#[derive(Debug, Clone)]
pub struct Mapping {
    size: SizePx,
    ratio: f64,
    placements: IndexMap<TextId, BoxPx>,
    atlas: RgbaImage,
}

impl Mapping {
    pub(crate) fn new(
        size: SizePx,
        ratio: f64,
        placements: IndexMap<TextId, BoxPx>,
        atlas: RgbaImage,
    ) -> Self {
        debug_assert_eq!(atlas.size(), size);
        Self {
            size,
            ratio,
            placements,
            atlas,
        }
    }

    /// A 1x1 mapping without any placements.
    pub fn empty(ratio: f64) -> Self {
        let size = SizePx::new(1, 1);
        Self::new(size, ratio, IndexMap::new(), RgbaImage::new(size))
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn size(&self) -> SizePx {
        self.size
    }

    /// Device pixels per logical pixel.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// The composed atlas image.
    pub fn atlas(&self) -> &RgbaImage {
        &self.atlas
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn contains(&self, id: &TextId) -> bool {
        self.placements.contains_key(id)
    }

    pub fn placements(&self) -> impl Iterator<Item = (&TextId, &BoxPx)> + Clone {
        self.placements.iter()
    }

    pub fn placement(&self, id: &TextId) -> Option<BoxPx> {
        self.placements.get(id).copied()
    }

    /// The position of the text in the mapping's order.
    pub fn index_of(&self, id: &TextId) -> Option<usize> {
        self.placements.get_index_of(id)
    }

    /// The placement of a text in render space (logical pixels).
    pub fn bounds_for_text(&self, id: &TextId) -> Option<Rect> {
        self.placements
            .get(id)
            .map(|b| Rect::from_pixels(b, self.ratio))
    }
}
