//! Raster masks over the build plate. Boolean operations on these masks stand
//! in for polygon clipping when deriving shells, skins, infill and support.

use common::config::SliceConfig;
use nalgebra::Vector2;

mod coverage;
mod fill;
mod lasso;
mod mask;
mod shadow;

pub use coverage::fill_triangles;
pub use fill::fill_polygons;
pub use mask::Mask;
pub use shadow::SupportShadow;

/// Mapping between build plate millimeters and mask pixels. Pixel `(0, 0)`
/// covers the square starting at `origin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterGrid {
    pub origin: Vector2<f32>,
    pub pixels_per_mm: f32,
    pub size: Vector2<u32>,
}

impl RasterGrid {
    pub fn new(size: Vector2<u32>, pixels_per_mm: f32) -> Self {
        Self {
            origin: Vector2::zeros(),
            pixels_per_mm,
            size,
        }
    }

    pub fn from_config(config: &SliceConfig) -> Self {
        Self::new(config.platform_resolution(), config.pixels_per_mm)
    }

    pub fn width(&self) -> u32 {
        self.size.x
    }

    pub fn height(&self) -> u32 {
        self.size.y
    }

    pub fn pixel_count(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    /// Converts a length in millimeters to pixels.
    pub fn mm_to_px(&self, mm: f32) -> f32 {
        mm * self.pixels_per_mm
    }

    /// Continuous pixel coordinates of a point on the plate.
    pub fn to_pixel(&self, point: Vector2<f32>) -> Vector2<f32> {
        (point - self.origin) * self.pixels_per_mm
    }

    /// Plate position of the center of a pixel.
    pub fn pixel_center(&self, x: f32, y: f32) -> Vector2<f32> {
        self.origin + Vector2::new(x + 0.5, y + 0.5) / self.pixels_per_mm
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector2;

    use super::RasterGrid;

    #[test]
    fn pixel_mapping() {
        let grid = RasterGrid::new(Vector2::new(100, 50), 10.0);
        assert_eq!(grid.pixel_count(), 5000);
        assert_eq!(grid.to_pixel(Vector2::new(1.0, 2.0)), Vector2::new(10.0, 20.0));
        assert_eq!(grid.pixel_center(0.0, 0.0), Vector2::new(0.05, 0.05));
        assert_eq!(grid.mm_to_px(0.4), 4.0);
    }
}
