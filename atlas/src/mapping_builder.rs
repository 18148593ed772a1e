use std::{collections::HashSet, rc::Rc};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use smudge_geometry::SizePx;
use tracing::instrument;

use crate::{GrowingPacker, Mapping, RectPacker, RgbaImage, TextRasterizer, TextSnapshot};

/// Rasterizes texts and packs them into a [`Mapping`].
#[derive(Clone)]
pub struct MappingBuilder {
    rasterizer: Rc<dyn TextRasterizer>,
    packer: Rc<dyn RectPacker>,
}

impl std::fmt::Debug for MappingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingBuilder").finish_non_exhaustive()
    }
}

impl MappingBuilder {
    pub fn new(rasterizer: impl TextRasterizer + 'static) -> Self {
        Self {
            rasterizer: Rc::new(rasterizer),
            packer: Rc::new(GrowingPacker),
        }
    }

    pub fn with_packer(mut self, packer: impl RectPacker + 'static) -> Self {
        self.packer = Rc::new(packer);
        self
    }

    /// Builds a mapping for all `texts` at the given device pixel ratio.
    ///
    /// Yields to the scheduler after each text is rasterized. The result is deterministic for
    /// a given order of texts.
    #[instrument(skip_all, fields(texts = texts.len()))]
    pub async fn build(
        &self,
        texts: &[TextSnapshot],
        ratio: f64,
        max_dimension: u32,
    ) -> Result<Mapping> {
        if texts.is_empty() {
            return Ok(Mapping::empty(ratio));
        }

        let mut seen = HashSet::with_capacity(texts.len());
        if let Some(duplicate) = texts.iter().find(|t| !seen.insert(&t.id)) {
            bail!("Text {} appears more than once", duplicate.id);
        }

        let mut images: Vec<RgbaImage> = Vec::with_capacity(texts.len());
        for text in texts {
            let image = self
                .rasterizer
                .rasterize(text, ratio)
                .with_context(|| format!("Rasterizing text {}", text.id))?;
            images.push(image);
            tokio::task::yield_now().await;
        }

        let sizes: Vec<SizePx> = images.iter().map(|image| image.size()).collect();
        let packing = self.packer.pack(&sizes, max_dimension)?;
        if packing.placements.len() != texts.len() {
            bail!(
                "Packer returned {} placements for {} texts",
                packing.placements.len(),
                texts.len()
            );
        }

        let mut atlas = RgbaImage::new(packing.size);
        let mut placements = IndexMap::with_capacity(texts.len());
        for ((text, image), placement) in texts.iter().zip(&images).zip(packing.placements) {
            atlas
                .blit(image, placement.min)
                .with_context(|| format!("Placing text {}", text.id))?;
            placements.insert(text.id.clone(), placement);
        }

        log::debug!(
            "Built mapping of {}x{} for {} texts",
            packing.size.width,
            packing.size.height,
            texts.len()
        );

        Ok(Mapping::new(packing.size, ratio, placements, atlas))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use itertools::Itertools;

    use super::*;
    use crate::{Text, TextId};

    /// 8x16 logical pixels per character, filled opaque.
    struct BlockRasterizer;

    impl TextRasterizer for BlockRasterizer {
        fn rasterize(&self, text: &TextSnapshot, ratio: f64) -> Result<RgbaImage> {
            let chars = text.value.chars().count().max(1) as f64;
            let size = SizePx::new((8.0 * chars * ratio) as u32, (16.0 * ratio) as u32);
            let mut image = RgbaImage::new(size);
            image.blend_rect(0, 0, size.width, size.height, [255, 255, 255, 255]);
            Ok(image)
        }
    }

    struct FailingRasterizer;

    impl TextRasterizer for FailingRasterizer {
        fn rasterize(&self, _text: &TextSnapshot, _ratio: f64) -> Result<RgbaImage> {
            bail!("no fonts")
        }
    }

    fn snapshots(texts: &[(&str, &str)]) -> Vec<TextSnapshot> {
        texts
            .iter()
            .map(|(id, value)| Text::new(*id, *value).snapshot())
            .collect()
    }

    #[tokio::test]
    async fn empty_set_builds_minimal_mapping() {
        let mapping = MappingBuilder::new(BlockRasterizer)
            .build(&[], 1.0, 4096)
            .await
            .unwrap();
        assert_eq!((mapping.width(), mapping.height()), (1, 1));
        assert!(mapping.is_empty());
    }

    #[tokio::test]
    async fn every_text_is_placed_once_without_overlap() {
        let texts = snapshots(&[("a", "Hi"), ("b", "Yo"), ("c", "A longer text"), ("d", "")]);
        let mapping = MappingBuilder::new(BlockRasterizer)
            .build(&texts, 2.0, 4096)
            .await
            .unwrap();

        assert_eq!(mapping.len(), 4);
        for text in &texts {
            let placement = mapping.placement(&text.id).unwrap();
            assert!(placement.min.x >= 0 && placement.min.y >= 0);
            assert!(placement.max.x as u32 <= mapping.width());
            assert!(placement.max.y as u32 <= mapping.height());
        }
        for ((_, a), (_, b)) in mapping.placements().tuple_combinations() {
            assert!(!a.intersects(b));
        }

        // Order of the input is kept.
        let ids: Vec<&TextId> = mapping.placements().map(|(id, _)| id).collect();
        assert_eq!(ids, texts.iter().map(|t| &t.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn atlas_contains_the_rasterized_pixels() {
        let texts = snapshots(&[("a", "Hi")]);
        let mapping = MappingBuilder::new(BlockRasterizer)
            .build(&texts, 1.0, 4096)
            .await
            .unwrap();
        let placement = mapping.placement(&"a".into()).unwrap();
        assert_eq!(
            mapping
                .atlas()
                .pixel(placement.min.x as u32, placement.min.y as u32),
            Some([255, 255, 255, 255])
        );
    }

    #[tokio::test]
    async fn bounds_are_reported_in_render_space() {
        let texts = snapshots(&[("a", "Hi")]);
        let mapping = MappingBuilder::new(BlockRasterizer)
            .build(&texts, 2.0, 4096)
            .await
            .unwrap();
        let bounds = mapping.bounds_for_text(&"a".into()).unwrap();
        assert_relative_eq!(bounds.size().width, 16.0);
        assert_relative_eq!(bounds.size().height, 16.0);
        assert!(mapping.bounds_for_text(&"x".into()).is_none());
    }

    #[tokio::test]
    async fn rebuilding_the_same_input_is_reproducible() {
        let texts = snapshots(&[("a", "Hi"), ("b", "Yo"), ("c", "Hey")]);
        let builder = MappingBuilder::new(BlockRasterizer);
        let first = builder.build(&texts, 1.0, 4096).await.unwrap();
        let second = builder.build(&texts, 1.0, 4096).await.unwrap();
        let a: Vec<_> = first.placements().collect();
        let b: Vec<_> = second.placements().collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn failures_are_propagated() {
        let texts = snapshots(&[("a", "Hi")]);
        assert!(
            MappingBuilder::new(FailingRasterizer)
                .build(&texts, 1.0, 4096)
                .await
                .is_err()
        );
        assert!(
            MappingBuilder::new(BlockRasterizer)
                .build(&texts, 1.0, 8)
                .await
                .is_err()
        );
        let duplicates = snapshots(&[("a", "Hi"), ("a", "Ho")]);
        assert!(
            MappingBuilder::new(BlockRasterizer)
                .build(&duplicates, 1.0, 4096)
                .await
                .is_err()
        );
    }
}
