use std::collections::HashSet;

use crate::{half_edge::HalfEdgeMesh, mesh::Mesh, Pos};

/// Finds faces that point down steeply enough to need support. `angle` is in
/// degrees and measured from the vertical, so a face is flagged when the
/// angle between its normal and straight up is over `90° + angle`.
pub fn detect_face_overhangs(mesh: &Mesh, points: &[Pos], angle: f32) -> Vec<usize> {
    let threshold = -angle.to_radians().sin();

    (0..mesh.face_count())
        .filter(|&face| mesh.world_normal(points, face).z < threshold)
        .collect()
}

/// Finds vertices that are lower than every vertex they share a face with.
/// Nothing else holds these up, so they start an icicle hanging into the air.
pub fn detect_point_overhangs(points: &[Pos], half_edge: &HalfEdgeMesh) -> Vec<u32> {
    let mut overhangs = Vec::new();
    let mut seen = HashSet::new();

    for edge in 0..half_edge.half_edge_count() {
        let origin = half_edge.get_edge(edge as u32).origin_vertex;
        if !seen.insert(origin) {
            continue;
        }

        let height = points[origin as usize].z;
        let neighbors = half_edge.connected_vertices(edge as u32);
        if (neighbors.iter())
            .filter(|&&x| x != origin)
            .all(|&x| height < points[x as usize].z)
        {
            overhangs.push(origin);
        }
    }

    overhangs
}

#[cfg(test)]
mod tests {
    use crate::{builder::MeshBuilder, Pos};

    use super::{detect_face_overhangs, detect_point_overhangs};

    #[test]
    fn cube_bottom_overhangs() {
        let mesh = MeshBuilder::cube(Pos::new(0.0, 0.0, 5.0), Pos::repeat(2.0));
        let points = mesh.transformed_vertices();

        let faces = detect_face_overhangs(&mesh, &points, 50.0);
        assert_eq!(faces.len(), 2);
        assert!(faces.iter().all(|&x| mesh.normal(x).z < -0.99));

        // Walls are vertical, so they are never flagged.
        let faces = detect_face_overhangs(&mesh, &points, 0.0);
        assert_eq!(faces.len(), 2);
    }

    #[test]
    fn tilted_faces() {
        let mut builder = MeshBuilder::new();
        // Normal points down and 30° away from vertical
        let (s, c) = 30_f32.to_radians().sin_cos();
        builder.add_triangle([
            Pos::zeros(),
            Pos::new(0.0, 1.0, 0.0),
            Pos::new(c, 0.0, s),
        ]);
        let mesh = builder.build();
        let points = mesh.transformed_vertices();

        assert!(mesh.normal(0).z < 0.0);
        assert_eq!(detect_face_overhangs(&mesh, &points, 45.0), [0]);
        assert!(detect_face_overhangs(&mesh, &points, 70.0).is_empty());
    }

    #[test]
    fn cone_tip_is_icicle() {
        let mut builder = MeshBuilder::new();
        // Upside down cone with its tip at the origin
        builder.add_vertical_cylinder(Pos::zeros(), 5.0, (0.0, 3.0), 16);
        let mesh = builder.build();
        let points = mesh.transformed_vertices();

        let icicles = detect_point_overhangs(&points, &mesh.half_edges());
        assert_eq!(icicles.len(), 1);
        assert_eq!(points[icicles[0] as usize], Pos::zeros());
    }

    #[test]
    fn flat_bottom_has_no_icicles() {
        let mesh = MeshBuilder::cube(Pos::zeros(), Pos::repeat(1.0));
        let points = mesh.transformed_vertices();
        assert!(detect_point_overhangs(&points, &mesh.half_edges()).is_empty());
    }
}
