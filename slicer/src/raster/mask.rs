use std::f32::consts::FRAC_1_SQRT_2;

use image::{GrayImage, Luma};
use rayon::prelude::*;

use super::RasterGrid;

pub(super) const SOLID: u8 = 255;
pub(super) const EMPTY: u8 = 0;

/// Binary occupancy of the build plate at one height. A pixel is solid when
/// its value is at least half intensity.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub(super) grid: RasterGrid,
    pub(super) image: GrayImage,
}

impl Mask {
    /// Creates a mask with no solid pixels.
    pub fn new(grid: RasterGrid) -> Self {
        Self {
            grid,
            image: GrayImage::new(grid.width(), grid.height()),
        }
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Sets every pixel, snapping `value` to solid or empty so the contour
    /// tracer sees the same occupancy as [`Mask::get`].
    pub fn fill(&mut self, value: u8) {
        self.image.fill(if value >= 128 { SOLID } else { EMPTY });
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] >= 128
    }

    pub fn set(&mut self, x: u32, y: u32, solid: bool) {
        self.image
            .put_pixel(x, y, Luma([if solid { SOLID } else { EMPTY }]));
    }

    pub fn is_empty(&self) -> bool {
        !self.image.as_raw().par_iter().any(|&x| x >= 128)
    }

    /// Count of solid pixels.
    pub fn count(&self) -> usize {
        self.image.as_raw().par_iter().filter(|&&x| x >= 128).count()
    }

    /// Solid area in square millimeters.
    pub fn area(&self) -> f32 {
        self.count() as f32 / (self.grid.pixels_per_mm * self.grid.pixels_per_mm)
    }

    /// Keeps only pixels that are also solid in `other`.
    pub fn logic_and(&mut self, other: &Mask) {
        self.combine(other, |a, b| a.min(b));
    }

    /// Clears every pixel that is solid in `other`.
    pub fn logic_and_not(&mut self, other: &Mask) {
        self.combine(other, |a, b| if b >= 128 { EMPTY } else { a });
    }

    pub fn logic_or(&mut self, other: &Mask) {
        self.combine(other, |a, b| a.max(b));
    }

    fn combine(&mut self, other: &Mask, op: impl Fn(u8, u8) -> u8 + Sync) {
        assert_eq!(
            self.grid, other.grid,
            "masks in one expression must share a raster grid"
        );

        ((*self.image).par_iter_mut())
            .zip(other.image.as_raw().par_iter())
            .for_each(|(a, &b)| *a = op(*a, b));
    }

    /// Cuts the mask into diagonal strips `line_width` wide separated by
    /// `spacing`. Even phases run one diagonal, odd phases the other, so that
    /// consecutive layers cross.
    pub fn overlay_infill_pattern(&mut self, phase: usize, line_width: f32, spacing: f32) {
        let period = line_width + spacing.max(0.0);
        if period <= 0.0 {
            return;
        }

        let grid = self.grid;
        let direction = if phase % 2 == 0 { 1.0 } else { -1.0 };
        let width = grid.width() as usize;

        (self.image.par_chunks_mut(width.max(1)))
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.iter_mut().enumerate() {
                    let center = grid.pixel_center(x as f32, y as f32);
                    let offset = (center.x + direction * center.y) * FRAC_1_SQRT_2;
                    if offset.rem_euclid(period) >= line_width {
                        *pixel = EMPTY;
                    }
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector2;
    use proptest::prelude::*;

    use crate::raster::RasterGrid;

    use super::Mask;

    fn grid() -> RasterGrid {
        RasterGrid::new(Vector2::new(24, 16), 2.0)
    }

    prop_compose! {
        fn arb_mask()(pixels in proptest::collection::vec(any::<bool>(), 24 * 16)) -> Mask {
            let mut mask = Mask::new(grid());
            for (i, solid) in pixels.into_iter().enumerate() {
                mask.set(i as u32 % 24, i as u32 / 24, solid);
            }
            mask
        }
    }

    proptest! {
        #[test]
        fn and_is_commutative(a in arb_mask(), b in arb_mask()) {
            let mut ab = a.clone();
            ab.logic_and(&b);
            let mut ba = b.clone();
            ba.logic_and(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn or_is_commutative(a in arb_mask(), b in arb_mask()) {
            let mut ab = a.clone();
            ab.logic_or(&b);
            let mut ba = b.clone();
            ba.logic_or(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn and_not_self_is_empty(a in arb_mask()) {
            let mut out = a.clone();
            out.logic_and_not(&a);
            prop_assert!(out.is_empty());
        }

        #[test]
        fn and_empty_is_empty(a in arb_mask()) {
            let mut out = a.clone();
            out.logic_and(&Mask::new(grid()));
            prop_assert!(out.is_empty());
        }

        #[test]
        fn and_not_only_clears(a in arb_mask(), b in arb_mask()) {
            let mut out = a.clone();
            out.logic_and_not(&b);
            for y in 0..16 {
                for x in 0..24 {
                    prop_assert_eq!(out.get(x, y), a.get(x, y) && !b.get(x, y));
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "share a raster grid")]
    fn mismatched_grids_panic() {
        let mut a = Mask::new(grid());
        let b = Mask::new(RasterGrid::new(Vector2::new(8, 8), 2.0));
        a.logic_or(&b);
    }

    #[test]
    fn pattern_density() {
        let grid = RasterGrid::new(Vector2::new(400, 400), 10.0);
        let mut mask = Mask::new(grid);
        mask.fill(255);
        mask.overlay_infill_pattern(0, 0.4, 1.6);

        // Strips 0.4mm wide every 2mm
        let share = mask.count() as f32 / grid.pixel_count() as f32;
        assert!((share - 0.2).abs() < 0.03, "got {share}");

        let mut other = Mask::new(grid);
        other.fill(255);
        other.overlay_infill_pattern(1, 0.4, 1.6);
        assert_ne!(mask, other, "phases should run in different directions");
    }

    #[test]
    fn full_fill() {
        let mut mask = Mask::new(grid());
        assert!(mask.is_empty());
        mask.fill(255);
        assert_eq!(mask.count(), 24 * 16);
        assert_eq!(mask.area(), 96.0);
    }

    #[test]
    fn faint_fill_stays_empty() {
        let mut mask = Mask::new(grid());
        mask.fill(100);
        assert!(mask.is_empty());
        assert!(mask.trace().is_empty());

        mask.fill(200);
        assert!(mask.get(3, 3));
        assert_eq!(mask.count(), 24 * 16);
    }
}
