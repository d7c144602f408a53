use nalgebra::Vector2;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use super::{mask::SOLID, Mask, RasterGrid};

/// Rasterizes closed polygons with the even-odd rule. A pixel is set when its
/// center lies inside an odd number of loops, so holes wound either way are
/// left empty.
pub fn fill_polygons(grid: &RasterGrid, loops: &[Vec<Vector2<f32>>]) -> Mask {
    let mut mask = Mask::new(*grid);
    let width = grid.width() as usize;
    if width == 0 || grid.height() == 0 {
        return mask;
    }

    let edges = (loops.iter())
        .filter(|x| x.len() >= 3)
        .flat_map(|points| {
            (0..points.len()).map(move |i| (points[i], points[(i + 1) % points.len()]))
        })
        .map(|(a, b)| (grid.to_pixel(a), grid.to_pixel(b)))
        .filter(|(a, b)| a.y != b.y)
        .collect::<Vec<_>>();

    if edges.is_empty() {
        return mask;
    }

    (mask.image.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, row)| {
            let center = y as f32 + 0.5;
            let mut crossings = Vec::new();

            for (a, b) in edges.iter() {
                // Half open so a vertex exactly on the scanline is counted once.
                if (a.y <= center) == (b.y <= center) {
                    continue;
                }

                let t = (center - a.y) / (b.y - a.y);
                crossings.push(OrderedFloat(a.x + t * (b.x - a.x)));
            }

            crossings.sort_unstable();
            for span in crossings.chunks_exact(2) {
                // Pixels whose centers fall within [start, end).
                let start = (span[0].0 - 0.5).ceil().max(0.0) as usize;
                let end = ((span[1].0 - 0.5).ceil().max(0.0) as usize).min(width);
                if start < end {
                    row[start..end].fill(SOLID);
                }
            }
        });

    mask
}
