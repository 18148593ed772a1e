use std::cmp::Reverse;

use anyhow::{Result, bail};
use etagere::{AtlasAllocator, size2};
use smudge_geometry::{BoxPx, PointPx, SizePx};

/// The result of packing rectangles into a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    /// The size of the container, at least 1x1.
    pub size: SizePx,
    /// The placement for each of the input sizes, in input order.
    pub placements: Vec<BoxPx>,
}

/// Packs rectangles into a minimal container.
pub trait RectPacker {
    /// Places all `sizes` without overlap. Fails if the container would need to be larger than
    /// `max_dimension` in any direction.
    fn pack(&self, sizes: &[SizePx], max_dimension: u32) -> Result<Packing>;
}

/// Packs into a power of two container that is grown until everything fits, and then shrunk
/// to the bounding box of the placements.
///
/// Rectangles are placed tallest first, equal heights keep their input order. Zero sized
/// rectangles occupy one pixel.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrowingPacker;

impl RectPacker for GrowingPacker {
    fn pack(&self, sizes: &[SizePx], max_dimension: u32) -> Result<Packing> {
        if sizes.is_empty() {
            return Ok(Packing {
                size: SizePx::new(1, 1),
                placements: Vec::new(),
            });
        }

        let sizes: Vec<SizePx> = sizes
            .iter()
            .map(|s| SizePx::new(s.width.max(1), s.height.max(1)))
            .collect();

        let widest = sizes.iter().map(|s| s.width).max().unwrap_or(1);
        let tallest = sizes.iter().map(|s| s.height).max().unwrap_or(1);
        if widest > max_dimension || tallest > max_dimension {
            bail!(
                "A text of {widest}x{tallest} pixels exceeds the maximum atlas dimension of {max_dimension}"
            );
        }

        // `sort_by_key` is stable.
        let mut order: Vec<usize> = (0..sizes.len()).collect();
        order.sort_by_key(|&i| Reverse(sizes[i].height));

        let area: u64 = sizes
            .iter()
            .map(|s| s.width as u64 * s.height as u64)
            .sum();
        let side = ((area as f64).sqrt().ceil() as u32).max(1);
        let mut container = SizePx::new(
            side.max(widest).next_power_of_two().min(max_dimension),
            side.max(tallest).next_power_of_two().min(max_dimension),
        );

        let mut grow_width = true;
        loop {
            if let Some(placements) = allocate_all(&sizes, &order, container) {
                let bounds = placements.iter().fold(SizePx::new(1, 1), |b, p| {
                    SizePx::new(b.width.max(p.max.x as u32), b.height.max(p.max.y as u32))
                });
                return Ok(Packing {
                    size: bounds,
                    placements,
                });
            }

            let can_grow_width = container.width < max_dimension;
            let can_grow_height = container.height < max_dimension;
            match (grow_width, can_grow_width, can_grow_height) {
                (true, true, _) | (false, true, false) => {
                    container.width = (container.width * 2).min(max_dimension);
                }
                (false, _, true) | (true, false, true) => {
                    container.height = (container.height * 2).min(max_dimension);
                }
                (_, false, false) => {
                    bail!(
                        "{} texts do not fit into an atlas of {max_dimension}x{max_dimension}",
                        sizes.len()
                    );
                }
            }
            grow_width = !grow_width;
        }
    }
}

fn allocate_all(sizes: &[SizePx], order: &[usize], container: SizePx) -> Option<Vec<BoxPx>> {
    let mut allocator =
        AtlasAllocator::new(size2(container.width as i32, container.height as i32));
    let mut placements = vec![BoxPx::zero(); sizes.len()];
    for &i in order {
        let size = sizes[i];
        let allocation = allocator.allocate(size2(size.width as i32, size.height as i32))?;
        // Allocation might be larger, so we can't use the rectangle directly.
        let min = allocation.rectangle.min;
        placements[i] = BoxPx::new(
            PointPx::new(min.x, min.y),
            PointPx::new(min.x + size.width as i32, min.y + size.height as i32),
        );
    }
    Some(placements)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn assert_valid(packing: &Packing, sizes: &[SizePx]) {
        assert_eq!(packing.placements.len(), sizes.len());
        for (placement, size) in packing.placements.iter().zip(sizes) {
            assert!(placement.min.x >= 0 && placement.min.y >= 0);
            assert!(placement.max.x as u32 <= packing.size.width);
            assert!(placement.max.y as u32 <= packing.size.height);
            assert_eq!(placement.width() as u32, size.width.max(1));
            assert_eq!(placement.height() as u32, size.height.max(1));
        }
        for (a, b) in packing.placements.iter().tuple_combinations() {
            assert!(!a.intersects(b), "{a:?} overlaps {b:?}");
        }
    }

    #[test]
    fn empty_input_yields_minimal_container() {
        let packing = GrowingPacker.pack(&[], 4096).unwrap();
        assert_eq!(packing.size, SizePx::new(1, 1));
        assert!(packing.placements.is_empty());
    }

    #[test]
    fn placements_do_not_overlap_and_stay_inside() {
        let sizes: Vec<SizePx> = (1..40)
            .map(|i| SizePx::new(7 * i % 53 + 1, 5 * i % 31 + 2))
            .collect();
        let packing = GrowingPacker.pack(&sizes, 4096).unwrap();
        assert_valid(&packing, &sizes);
    }

    #[test]
    fn zero_sized_rectangles_occupy_a_pixel() {
        let sizes = [SizePx::new(0, 0), SizePx::new(3, 0)];
        let packing = GrowingPacker.pack(&sizes, 64).unwrap();
        assert_valid(&packing, &sizes);
    }

    #[test]
    fn packing_is_deterministic() {
        let sizes: Vec<SizePx> = (0..20).map(|i| SizePx::new(10 + i, 12)).collect();
        let a = GrowingPacker.pack(&sizes, 1024).unwrap();
        let b = GrowingPacker.pack(&sizes, 1024).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn container_grows_beyond_the_initial_guess() {
        // A long strip forces growth in one direction.
        let sizes = vec![SizePx::new(100, 4); 30];
        let packing = GrowingPacker.pack(&sizes, 4096).unwrap();
        assert_valid(&packing, &sizes);
    }

    #[test]
    fn exceeding_the_maximum_dimension_fails() {
        assert!(GrowingPacker.pack(&[SizePx::new(65, 1)], 64).is_err());
        let many = vec![SizePx::new(40, 40); 8];
        assert!(GrowingPacker.pack(&many, 64).is_err());
    }
}
