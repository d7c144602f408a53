//! Top down coverage of triangles and discs on the raster grid.

use itertools::iproduct;
use nalgebra::Vector2;

use crate::Pos;

use super::{mask::SOLID, Mask, RasterGrid};

/// Marks every pixel whose center is covered by one of the triangles when
/// seen from above.
pub fn fill_triangles(grid: &RasterGrid, triangles: &[[Pos; 3]]) -> Mask {
    let mut mask = Mask::new(*grid);
    let pixels: &mut [u8] = &mut mask.image;
    for corners in triangles {
        for (pixel, _) in rasterize_triangle(grid, *corners) {
            pixels[pixel as usize] = SOLID;
        }
    }

    mask
}

/// Yields the index and interpolated height of every pixel whose center is
/// covered by the triangle seen from above. Vertical triangles cover nothing.
pub(super) fn rasterize_triangle(
    grid: &RasterGrid,
    corners: [Pos; 3],
) -> impl Iterator<Item = (u32, f32)> {
    let [a, b, c] = corners.map(|x| grid.to_pixel(x.xy()));
    let area = (b - a).perp(&(c - a));

    let min = a.inf(&b).inf(&c);
    let max = a.sup(&b).sup(&c);
    let (x_range, y_range) = if area.abs() > f32::EPSILON {
        pixel_span(grid, min, max)
    } else {
        ((0, 0), (0, 0))
    };

    let width = grid.width();
    iproduct!(y_range.0..y_range.1, x_range.0..x_range.1).filter_map(move |(y, x)| {
        let p = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);
        let w0 = (c - b).perp(&(p - b)) / area;
        let w1 = (a - c).perp(&(p - c)) / area;
        let w2 = 1.0 - w0 - w1;
        (w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0).then(|| {
            let z = corners[0].z * w0 + corners[1].z * w1 + corners[2].z * w2;
            (y * width + x, z)
        })
    })
}

pub(super) fn rasterize_disc(
    grid: &RasterGrid,
    center: Vector2<f32>,
    radius: f32,
) -> impl Iterator<Item = u32> {
    let center = grid.to_pixel(center);
    let radius = grid.mm_to_px(radius).max(0.5);
    let (x_range, y_range) = pixel_span(grid, center.add_scalar(-radius), center.add_scalar(radius));

    let width = grid.width();
    iproduct!(y_range.0..y_range.1, x_range.0..x_range.1).filter_map(move |(y, x)| {
        let offset = Vector2::new(x as f32 + 0.5, y as f32 + 0.5) - center;
        (offset.magnitude_squared() <= radius * radius).then_some(y * width + x)
    })
}

/// Pixel ranges overlapping a box in continuous pixel coordinates, clamped
/// to the grid.
fn pixel_span(grid: &RasterGrid, min: Vector2<f32>, max: Vector2<f32>) -> ((u32, u32), (u32, u32)) {
    let clamp = |value: f32, limit: u32| value.max(0.0).min(limit as f32) as u32;
    (
        (clamp(min.x.floor(), grid.width()), clamp(max.x.ceil(), grid.width())),
        (clamp(min.y.floor(), grid.height()), clamp(max.y.ceil(), grid.height())),
    )
}
