use common::config::SliceConfig;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    mesh::Mesh,
    supports::{detect_face_overhangs, detect_point_overhangs},
    Pos,
};

use super::{
    coverage::{rasterize_disc, rasterize_triangle},
    mask::{EMPTY, SOLID},
    Mask, RasterGrid,
};

/// Orthographic view of the model from below. Every pixel keeps the heights
/// of all surfaces above it, sorted from the bottom up, each tagged with
/// whether it is an overhang that needs holding up or solid model that
/// stops a support column.
pub struct SupportShadow {
    grid: RasterGrid,
    /// Index of the first surface of each pixel, with one extra entry at the
    /// end.
    offsets: Vec<u32>,
    surfaces: Vec<Surface>,
}

#[derive(Debug, Clone, Copy)]
struct Surface {
    z: f32,
    overhang: bool,
}

impl SupportShadow {
    pub fn build(grid: &RasterGrid, mesh: &Mesh, points: &[Pos], config: &SliceConfig) -> Self {
        let support = &config.support;
        let gap = (support.top_gap + support.bottom_gap) as f32 * config.layer_height;

        let overhangs = detect_face_overhangs(mesh, points, support.angle);
        let icicles = detect_point_overhangs(points, &mesh.half_edges());
        debug!(
            "Found {} overhanging faces and {} icicles",
            overhangs.len(),
            icicles.len()
        );

        let faces = mesh.faces();
        let mut hits = (0..faces.len())
            .into_par_iter()
            .flat_map_iter(|face| {
                let corners = faces[face].map(|x| points[x as usize]);
                rasterize_triangle(grid, corners).map(move |(pixel, z)| {
                    (pixel, Surface { z: z + gap, overhang: false })
                })
            })
            .chain(overhangs.par_iter().flat_map_iter(|&face| {
                let corners = faces[face].map(|x| points[x as usize]);
                rasterize_triangle(grid, corners).map(|(pixel, z)| {
                    (pixel, Surface { z, overhang: true })
                })
            }))
            .chain(icicles.par_iter().flat_map_iter(|&vertex| {
                let point = points[vertex as usize];
                rasterize_disc(grid, point.xy(), support.icicle_radius).map(move |pixel| {
                    (pixel, Surface { z: point.z, overhang: true })
                })
            }))
            .collect::<Vec<_>>();

        // Overhangs sort before blockers at the same height.
        hits.par_sort_unstable_by_key(|(pixel, surface)| {
            (*pixel, OrderedFloat(surface.z), !surface.overhang)
        });

        let mut offsets = vec![0; grid.pixel_count() + 1];
        for (pixel, _) in hits.iter() {
            offsets[*pixel as usize + 1] += 1;
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }

        Self {
            grid: *grid,
            offsets,
            surfaces: hits.into_iter().map(|(_, x)| x).collect(),
        }
    }

    /// Marks every pixel where the first surface above `clip_z` is an
    /// overhang. Other pixels are cleared.
    pub fn render(&self, clip_z: f32, mask: &mut Mask) {
        assert_eq!(self.grid, mask.grid, "shadow and mask use different grids");

        let width = self.grid.width() as usize;
        (mask.image.par_chunks_mut(width.max(1)))
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.iter_mut().enumerate() {
                    let idx = y * width + x;
                    let range = self.offsets[idx] as usize..self.offsets[idx + 1] as usize;
                    let surfaces = &self.surfaces[range];

                    let above = surfaces.partition_point(|x| x.z <= clip_z);
                    let supported = surfaces.get(above).is_some_and(|x| x.overhang);
                    *pixel = if supported { SOLID } else { EMPTY };
                }
            });
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }
}

#[cfg(test)]
mod tests {
    use common::config::SliceConfig;
    use nalgebra::Vector2;

    use crate::{builder::MeshBuilder, raster::{Mask, RasterGrid}, Pos};

    use super::SupportShadow;

    fn config() -> SliceConfig {
        let mut config = SliceConfig::default();
        config.layer_height = 0.3;
        config.support.top_gap = 0;
        config.support.bottom_gap = 1;
        config
    }

    #[test]
    fn floating_cube_casts_shadow() {
        let grid = RasterGrid::new(Vector2::new(100, 100), 10.0);
        let mesh = MeshBuilder::cube(Pos::new(2.0, 2.0, 3.0), Pos::new(4.0, 4.0, 1.0));
        let points = mesh.transformed_vertices();
        let shadow = SupportShadow::build(&grid, &mesh, &points, &config());

        let mut mask = Mask::new(grid);
        shadow.render(1.0, &mut mask);
        assert!((mask.area() - 16.0).abs() < 0.5, "got {}", mask.area());
        assert!(mask.get(40, 40));
        assert!(!mask.get(10, 10));

        // Inside and above the cube nothing needs support.
        shadow.render(3.5, &mut mask);
        assert!(mask.is_empty());
        shadow.render(5.0, &mut mask);
        assert!(mask.is_empty());
    }

    #[test]
    fn support_stops_on_model() {
        let grid = RasterGrid::new(Vector2::new(100, 100), 10.0);
        let mut builder = MeshBuilder::new();
        builder.add_cube(Pos::new(2.0, 2.0, 0.0), Pos::new(2.0, 2.0, 1.0));
        builder.add_cube(Pos::new(2.0, 2.0, 3.0), Pos::new(6.0, 6.0, 1.0));
        let mesh = builder.build();
        let points = mesh.transformed_vertices();
        let shadow = SupportShadow::build(&grid, &mesh, &points, &config());

        let mut mask = Mask::new(grid);
        // Above the small block, past the bottom gap
        shadow.render(2.0, &mut mask);
        assert!(mask.get(30, 30));
        assert!(mask.get(70, 70));

        // Within the bottom gap over the block
        shadow.render(1.1, &mut mask);
        assert!(!mask.get(30, 30));
        assert!(mask.get(70, 70));
    }

    #[test]
    fn icicle_gets_disc() {
        let grid = RasterGrid::new(Vector2::new(100, 100), 10.0);
        let mut builder = MeshBuilder::new();
        builder.add_vertical_cylinder(Pos::new(5.0, 5.0, 2.0), 4.0, (0.0, 1.0), 8);
        let mesh = builder.build();
        let points = mesh.transformed_vertices();

        let mut config = config();
        config.support.angle = 89.0;
        let shadow = SupportShadow::build(&grid, &mesh, &points, &config);

        let mut mask = Mask::new(grid);
        shadow.render(1.0, &mut mask);
        assert!(mask.get(50, 50));
        let expected = std::f32::consts::PI * config.support.icicle_radius.powi(2);
        assert!((mask.area() - expected).abs() < 0.3, "got {}", mask.area());
    }
}
