use anyhow::{Result, bail};
use smudge_geometry::{PointPx, SizePx};

/// An RGBA8 image with straight alpha, stored row by row without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaImage {
    size: SizePx,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for RgbaImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbaImage")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .finish()
    }
}

impl RgbaImage {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// A fully transparent image.
    pub fn new(size: SizePx) -> Self {
        Self {
            size,
            pixels: vec![0; size.width as usize * size.height as usize * Self::BYTES_PER_PIXEL],
        }
    }

    pub fn from_pixels(size: SizePx, pixels: Vec<u8>) -> Result<Self> {
        let expected = size.width as usize * size.height as usize * Self::BYTES_PER_PIXEL;
        if pixels.len() != expected {
            bail!(
                "Image of {}x{} requires {expected} bytes, got {}",
                size.width,
                size.height,
                pixels.len()
            );
        }
        Ok(Self { size, pixels })
    }

    pub fn size(&self) -> SizePx {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let i = self.offset(x, y)?;
        let p = &self.pixels[i..i + Self::BYTES_PER_PIXEL];
        Some([p[0], p[1], p[2], p[3]])
    }

    /// Composes `color` over the pixels of a rectangle. Parts outside of the image are clipped.
    pub fn blend_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: [u8; 4]) {
        if color[3] == 0 {
            return;
        }
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(self.size.width as i64);
        let y1 = (y as i64 + height as i64).min(self.size.height as i64);
        for py in y0..y1 {
            for px in x0..x1 {
                if let Some(i) = self.offset(px as u32, py as u32) {
                    let dst = &mut self.pixels[i..i + Self::BYTES_PER_PIXEL];
                    blend_over(dst, color);
                }
            }
        }
    }

    /// Copies another image into this one with its top left corner at `at`.
    ///
    /// The source must fit completely.
    pub fn blit(&mut self, source: &RgbaImage, at: PointPx) -> Result<()> {
        let fits = at.x >= 0
            && at.y >= 0
            && at.x as u64 + source.size.width as u64 <= self.size.width as u64
            && at.y as u64 + source.size.height as u64 <= self.size.height as u64;
        if !fits {
            bail!(
                "Image of {}x{} does not fit at {},{} into {}x{}",
                source.size.width,
                source.size.height,
                at.x,
                at.y,
                self.size.width,
                self.size.height
            );
        }

        let row_len = source.size.width as usize * Self::BYTES_PER_PIXEL;
        for row in 0..source.size.height {
            let src = row as usize * row_len;
            let Some(dst) = self.offset(at.x as u32, at.y as u32 + row) else {
                continue;
            };
            self.pixels[dst..dst + row_len].copy_from_slice(&source.pixels[src..src + row_len]);
        }
        Ok(())
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.size.width && y < self.size.height).then(|| {
            (y as usize * self.size.width as usize + x as usize) * Self::BYTES_PER_PIXEL
        })
    }
}

/// Straight alpha source-over.
fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let oa = sa + da * (1.0 - sa);
    if oa <= 0.0 {
        return;
    }
    for c in 0..3 {
        let sc = src[c] as f32 / 255.0;
        let dc = dst[c] as f32 / 255.0;
        let oc = (sc * sa + dc * da * (1.0 - sa)) / oa;
        dst[c] = (oc * 255.0).round() as u8;
    }
    dst[3] = (oa * 255.0).round() as u8;
}
