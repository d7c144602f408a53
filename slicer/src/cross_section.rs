//! Turns plane and triangle intersections into closed outline loops.

use std::collections::HashMap;

use nalgebra::Vector2;
use tracing::warn;

use crate::{
    mesh::{face_normal, Mesh},
    raster::{fill_polygons, fill_triangles, Mask, RasterGrid},
    Pos,
};

/// Undirected mesh edge, smaller vertex index first.
type EdgeKey = (u32, u32);

/// Chain ends closer than this in millimeters are considered the same point.
const JOIN_EPSILON: f32 = 1e-4;
/// Faces with every corner this close to the plane lie in it.
const COPLANAR_EPSILON: f32 = 1e-5;

/// Where a plane cuts through one triangle. The segment runs so that the
/// outside of the model is on its right, making outer loops counter
/// clockwise when seen from above.
#[derive(Debug, Clone, Copy)]
pub struct Crossing {
    pub points: [Pos; 2],
    /// Mesh edges the two points lie on.
    pub edges: [EdgeKey; 2],
}

/// Outline of the model at one height.
#[derive(Debug, Clone, Default)]
pub struct Rim {
    pub z: f32,
    pub loops: Vec<Vec<Vector2<f32>>>,
    /// Faces lying in the plane. They give no outline but are still solid.
    pub flats: Vec<[Pos; 3]>,
    /// Number of gaps that had to be bridged to close the loops. Anything
    /// other than zero means the mesh is open at this height.
    pub repaired: usize,
}

/// Intersects a plane with a triangle. Triangles lying in the plane or only
/// touching it at a vertex give nothing.
pub fn triangle_crossing(mesh: &Mesh, points: &[Pos], face: usize, height: f32) -> Option<Crossing> {
    let face = mesh.face(face);
    let distance = face.map(|x| points[x as usize].z - height);
    let above = distance.map(|x| x > 0.0);

    let mut out = [Pos::zeros(); 2];
    let mut edges = [(0, 0); 2];
    let mut n = 0;

    for (a, b) in [(0, 1), (1, 2), (2, 0)] {
        if above[a] == above[b] {
            continue;
        }

        // Can only happen with NaN coordinates.
        if n == 2 {
            return None;
        }

        let t = distance[a] / (distance[a] - distance[b]);
        let (start, end) = (points[face[a] as usize], points[face[b] as usize]);
        out[n] = start + t * (end - start);
        edges[n] = (face[a].min(face[b]), face[a].max(face[b]));
        n += 1;
    }

    if n != 2 {
        return None;
    }

    let normal = face_normal(points, face);
    let direction = out[1] - out[0];
    if normal.x * direction.y - normal.y * direction.x < 0.0 {
        out.swap(0, 1);
        edges.swap(0, 1);
    }

    Some(Crossing { points: out, edges })
}

/// Corners of a triangle lying flat in the plane at the given height.
pub fn coplanar_face(mesh: &Mesh, points: &[Pos], face: usize, height: f32) -> Option<[Pos; 3]> {
    let corners = mesh.face(face).map(|x| points[x as usize]);
    (corners.iter())
        .all(|x| (x.z - height).abs() <= COPLANAR_EPSILON)
        .then_some(corners)
}

impl Rim {
    /// Links crossings that share a mesh edge into loops. Chains that can't
    /// be closed because of holes in the mesh are joined to the nearest other
    /// open chain, or closed on themselves, and counted in `repaired`.
    pub fn from_crossings(z: f32, crossings: &[Crossing]) -> Self {
        let mut by_start = HashMap::<EdgeKey, Vec<usize>>::new();
        let mut by_end = HashMap::<EdgeKey, Vec<usize>>::new();
        for (idx, crossing) in crossings.iter().enumerate() {
            by_start.entry(crossing.edges[0]).or_default().push(idx);
            by_end.entry(crossing.edges[1]).or_default().push(idx);
        }

        let mut used = vec![false; crossings.len()];
        let find = |map: &HashMap<EdgeKey, Vec<usize>>, key: EdgeKey, used: &[bool]| {
            map.get(&key)
                .and_then(|x| x.iter().copied().find(|&i| !used[i]))
        };

        let mut loops = Vec::new();
        let mut open = Vec::new();

        for first in 0..crossings.len() {
            if used[first] {
                continue;
            }
            used[first] = true;

            let start_edge = crossings[first].edges[0];
            let mut points = crossings[first].points.map(|x| x.xy()).to_vec();
            let mut tail = crossings[first].edges[1];

            let closed = loop {
                if tail == start_edge {
                    break true;
                }

                // Faces with flipped winding produce segments running the
                // wrong way, follow those backwards.
                let next = find(&by_start, tail, &used)
                    .map(|x| (x, false))
                    .or_else(|| find(&by_end, tail, &used).map(|x| (x, true)));
                let Some((next, reversed)) = next else {
                    break false;
                };

                used[next] = true;
                let end = reversed as usize ^ 1;
                points.push(crossings[next].points[end].xy());
                tail = crossings[next].edges[end];
            };

            if closed {
                points.pop();
                loops.push(points);
            } else {
                open.push(points);
            }
        }

        let repaired = close_open_chains(&mut open);
        if repaired > 0 {
            warn!("Outline at z={z} had {repaired} gaps, the mesh is not watertight");
        }

        loops.extend(open);
        loops.retain(|x| x.len() >= 3);

        Self {
            z,
            loops,
            flats: Vec::new(),
            repaired,
        }
    }

    pub fn with_flats(mut self, flats: Vec<[Pos; 3]>) -> Self {
        self.flats = flats;
        self
    }

    /// Intersects every face of the mesh with the plane. Use
    /// [`crate::segments::Segments::rim`] to skip faces far from the plane.
    pub fn extract(mesh: &Mesh, points: &[Pos], height: f32) -> Self {
        let crossings = (0..mesh.face_count())
            .filter_map(|face| triangle_crossing(mesh, points, face, height))
            .collect::<Vec<_>>();
        let flats = (0..mesh.face_count())
            .filter_map(|face| coplanar_face(mesh, points, face, height))
            .collect();
        Self::from_crossings(height, &crossings).with_flats(flats)
    }

    pub fn is_complete(&self) -> bool {
        self.repaired == 0
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty() && self.flats.is_empty()
    }

    /// Solid area inside the outline, with nested loops alternating between
    /// solid and hole. Faces lying in the plane are added on top.
    pub fn fill(&self, grid: &RasterGrid) -> Mask {
        let mut mask = fill_polygons(grid, &self.loops);
        if !self.flats.is_empty() {
            mask.logic_or(&fill_triangles(grid, &self.flats));
        }
        mask
    }
}

/// Greedily joins each open chain to whichever chain start is closest to its
/// end, closing it on itself once its own start is the closest. Chains that
/// meet exactly were only split by where the walk started and don't count as
/// repairs. Returns the number of bridged gaps.
fn close_open_chains(open: &mut Vec<Vec<Vector2<f32>>>) -> usize {
    let mut closed = Vec::new();
    let mut repaired = 0;

    while let Some(mut chain) = open.pop() {
        loop {
            let (start, end) = (chain[0], chain[chain.len() - 1]);
            let own = (end - start).magnitude();
            let nearest = (open.iter().enumerate())
                .map(|(i, x)| (i, (x[0] - end).magnitude()))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((i, distance)) if distance < own => {
                    let next = open.swap_remove(i);
                    if distance <= JOIN_EPSILON {
                        chain.extend_from_slice(&next[1..]);
                    } else {
                        repaired += 1;
                        chain.extend(next);
                    }
                }
                _ => {
                    if own <= JOIN_EPSILON {
                        chain.pop();
                    } else {
                        repaired += 1;
                    }
                    break;
                }
            }
        }

        closed.push(chain);
    }

    *open = closed;
    repaired
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector2;

    use crate::{builder::MeshBuilder, mesh::Mesh, raster::RasterGrid, Pos};

    use super::{triangle_crossing, Rim};

    fn signed_area(points: &[Vector2<f32>]) -> f32 {
        (0..points.len())
            .map(|i| points[i].perp(&points[(i + 1) % points.len()]))
            .sum::<f32>()
            / 2.0
    }

    #[test]
    fn cube_outline() {
        let mesh = MeshBuilder::cube(Pos::new(1.0, 1.0, 0.0), Pos::new(2.0, 3.0, 1.0));
        let points = mesh.transformed_vertices();
        let rim = Rim::extract(&mesh, &points, 0.5);

        assert!(rim.is_complete());
        assert_eq!(rim.loops.len(), 1);
        let area = signed_area(&rim.loops[0]);
        assert!((area - 6.0).abs() < 1e-4, "outer loop should be ccw, got {area}");

        let grid = RasterGrid::new(Vector2::new(50, 50), 10.0);
        let mask = rim.fill(&grid);
        assert_eq!(mask.count(), 20 * 30);
    }

    #[test]
    fn missing_plane() {
        let mesh = MeshBuilder::cube(Pos::zeros(), Pos::repeat(1.0));
        let points = mesh.transformed_vertices();
        assert!(Rim::extract(&mesh, &points, 2.0).is_empty());
        assert!(mesh.intersect_plane(-1.0).is_empty());
        assert_eq!(mesh.intersect_plane(0.5).len(), 8);
    }

    #[test]
    fn coplanar_triangle_is_ignored() {
        let mesh = Mesh::new(
            vec![Pos::zeros(), Pos::x(), Pos::y()],
            vec![[0, 1, 2]],
        );
        let points = mesh.transformed_vertices();
        assert!(triangle_crossing(&mesh, &points, 0, 0.0).is_none());

        let rim = Rim::extract(&mesh, &points, 0.0);
        assert!(rim.loops.is_empty());
        assert_eq!(rim.flats.len(), 1);
        let grid = RasterGrid::new(Vector2::new(20, 20), 10.0);
        assert!(rim.fill(&grid).get(2, 2));
        assert!(Rim::extract(&mesh, &points, 0.1).is_empty());
    }

    #[test]
    fn cut_through_top_face_is_solid() {
        let mesh = MeshBuilder::cube(Pos::new(1.0, 1.0, 0.0), Pos::new(2.0, 2.0, 1.0));
        let points = mesh.transformed_vertices();
        let rim = Rim::extract(&mesh, &points, 1.0);

        // The walls end at the plane, so only the lid's two faces remain.
        assert!(rim.loops.is_empty());
        assert_eq!(rim.flats.len(), 2);
        let grid = RasterGrid::new(Vector2::new(50, 50), 10.0);
        assert_eq!(rim.fill(&grid).count(), 20 * 20);
    }

    #[test]
    fn tube_has_hole() {
        let mut builder = MeshBuilder::new();
        builder.add_vertical_cylinder(Pos::new(5.0, 5.0, 0.0), 2.0, (3.0, 3.0), 32);
        let outer = builder.build();

        let mut builder = MeshBuilder::new();
        builder.add_vertical_cylinder(Pos::new(5.0, 5.0, 0.0), 2.0, (1.0, 1.0), 32);
        let inner = builder.build();

        // Flip the inner cylinder inside out to make it a cavity.
        let mut vertices = outer.vertices().to_vec();
        let offset = vertices.len() as u32;
        vertices.extend_from_slice(inner.vertices());
        let faces = (outer.faces().iter().copied())
            .chain(inner.faces().iter().map(|[a, b, c]| [a + offset, c + offset, b + offset]))
            .collect::<Vec<_>>();
        let mesh = Mesh::new(vertices, faces);
        let points = mesh.transformed_vertices();

        let rim = Rim::extract(&mesh, &points, 1.0);
        assert!(rim.is_complete());
        assert_eq!(rim.loops.len(), 2);

        let mut areas = rim.loops.iter().map(|x| signed_area(x)).collect::<Vec<_>>();
        areas.sort_by(|a, b| a.total_cmp(b));
        assert!(areas[0] < 0.0 && areas[1] > 0.0, "{areas:?}");

        let grid = RasterGrid::new(Vector2::new(100, 100), 10.0);
        let mask = rim.fill(&grid);
        assert!(!mask.get(50, 50));
        assert!(mask.get(50, 30));
    }

    #[test]
    fn open_mesh_is_repaired() {
        let full = MeshBuilder::cube(Pos::zeros(), Pos::repeat(2.0));
        // Drop a wall so the outline has a gap.
        let faces = (full.faces().iter().copied())
            .enumerate()
            .filter(|(i, _)| !(4..6).contains(i))
            .map(|(_, x)| x)
            .collect::<Vec<_>>();
        let mesh = Mesh::new(full.vertices().to_vec(), faces);
        let points = mesh.transformed_vertices();

        let rim = Rim::extract(&mesh, &points, 1.0);
        assert!(!rim.is_complete());
        assert_eq!(rim.repaired, 1);
        assert_eq!(rim.loops.len(), 1);

        let grid = RasterGrid::new(Vector2::new(30, 30), 10.0);
        assert_eq!(rim.fill(&grid).count(), 20 * 20);
    }
}
