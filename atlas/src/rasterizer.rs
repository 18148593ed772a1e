use std::cell::RefCell;

use anyhow::{Result, bail};
use cosmic_text::{
    Attrs, Buffer, Family, FontSystem, Metrics, Shaping, Style, SwashCache, Weight, Wrap,
};
use smudge_geometry::SizePx;

use crate::{FontStyle, RgbaImage, TextSnapshot};

/// Renders a text into pixels.
pub trait TextRasterizer {
    /// Rasterizes the text at `ratio` device pixels per logical pixel. The resulting image
    /// includes the text's padding and is at least 1x1.
    fn rasterize(&self, text: &TextSnapshot, ratio: f64) -> Result<RgbaImage>;
}

/// Rasterizes texts with cosmic-text and its swash backed glyph cache.
pub struct CosmicRasterizer {
    font_system: RefCell<FontSystem>,
    swash_cache: RefCell<SwashCache>,
}

impl Default for CosmicRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl CosmicRasterizer {
    /// Loads the system fonts.
    pub fn new() -> Self {
        Self::with_font_system(FontSystem::new())
    }

    pub fn with_font_system(font_system: FontSystem) -> Self {
        Self {
            font_system: font_system.into(),
            swash_cache: SwashCache::new().into(),
        }
    }
}

impl TextRasterizer for CosmicRasterizer {
    fn rasterize(&self, text: &TextSnapshot, ratio: f64) -> Result<RgbaImage> {
        let properties = &text.properties;
        if !(properties.size > 0.0) || !(ratio > 0.0) {
            bail!(
                "Text {} can't be rasterized at size {} and ratio {ratio}",
                text.id,
                properties.size
            );
        }

        let font_size = properties.size * ratio as f32;
        let line_height = font_size * properties.leading.max(0.0);

        let mut font_system = self.font_system.borrow_mut();
        let font_system = &mut *font_system;
        let mut swash_cache = self.swash_cache.borrow_mut();

        let mut buffer = Buffer::new(font_system, Metrics::new(font_size, line_height));
        buffer.set_wrap(font_system, Wrap::None);
        buffer.set_size(font_system, None, None);

        let style = match properties.style {
            FontStyle::Normal => Style::Normal,
            FontStyle::Italic => Style::Italic,
        };
        let attrs = Attrs::new()
            .family(family(&properties.family))
            .weight(Weight(properties.weight))
            .style(style);
        buffer.set_text(font_system, &text.value, &attrs, Shaping::Advanced, None);
        buffer.shape_until_scroll(font_system, false);

        let (mut width, mut height) = (0f32, 0f32);
        for run in buffer.layout_runs() {
            width = width.max(run.line_w);
            height = height.max(run.line_top + run.line_height);
        }

        let padding = properties.padding().to_pixels(ratio);
        let size = SizePx::new(
            (width.ceil() as u32 + padding.left + padding.right).max(1),
            (height.ceil() as u32 + padding.top + padding.bottom).max(1),
        );

        let mut image = RgbaImage::new(size);
        let [r, g, b, a] = properties.fill.to_rgba8();
        buffer.draw(
            font_system,
            &mut swash_cache,
            cosmic_text::Color::rgba(r, g, b, a),
            |x, y, w, h, color| {
                image.blend_rect(
                    x + padding.left as i32,
                    y + padding.top as i32,
                    w,
                    h,
                    [color.r(), color.g(), color.b(), color.a()],
                );
            },
        );

        log::debug!(
            "Rasterized text {} into {}x{}",
            text.id,
            size.width,
            size.height
        );

        Ok(image)
    }
}

fn family(name: &str) -> Family<'_> {
    match name {
        "serif" => Family::Serif,
        "sans-serif" => Family::SansSerif,
        "monospace" => Family::Monospace,
        "cursive" => Family::Cursive,
        "fantasy" => Family::Fantasy,
        name => Family::Name(name),
    }
}
