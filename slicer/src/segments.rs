use crate::{
    cross_section::{coplanar_face, triangle_crossing, Crossing, Rim},
    mesh::Mesh,
    Pos,
};

/// Acceleration structure for mesh slicing. By splitting the mesh into bands
/// along the slicing axis and adding references to all the triangles that
/// overlap each band, slicing a layer only needs to look at the faces near
/// the plane instead of every face in the mesh.
pub struct Segments {
    start_height: f32,
    band_height: f32,

    bands: Vec<Vec<usize>>,
    transformed_points: Vec<Pos>,
}

impl Segments {
    /// Creates a new Segments structure from a given mesh and band count.
    pub fn from_mesh(mesh: &Mesh, band_count: usize) -> Self {
        let transformed_points = mesh.transformed_vertices();
        let (min, max) = mesh.bounds();

        // A flat mesh still gets one usable band.
        let band_count = band_count.max(1);
        let band_height = ((max.z - min.z) / band_count as f32).max(f32::EPSILON);
        let mut bands = vec![Vec::new(); band_count + 1];

        let band = |z: f32| (((z - min.z) / band_height).max(0.0) as usize).min(band_count);
        for face in 0..mesh.face_count() {
            let (bottom, top) = triangle_bounds(mesh, &transformed_points, face);
            for band in bands.iter_mut().take(band(top) + 1).skip(band(bottom)) {
                band.push(face);
            }
        }

        Self {
            start_height: min.z,
            band_height,

            bands,
            transformed_points,
        }
    }

    /// Mesh vertices with the model transform already applied.
    pub fn points(&self) -> &[Pos] {
        &self.transformed_points
    }

    /// Faces that may cross the plane at the given height.
    pub fn candidates(&self, height: f32) -> &[usize] {
        let band = (height - self.start_height) / self.band_height;
        if !(0.0..self.bands.len() as f32).contains(&band) {
            return &[];
        }

        &self.bands[band as usize]
    }

    /// Intersects a plane with the mesh this Segments instance was built with.
    pub fn intersect_plane(&self, mesh: &Mesh, height: f32) -> Vec<Crossing> {
        (self.candidates(height).iter())
            .filter_map(|&face| triangle_crossing(mesh, &self.transformed_points, face, height))
            .collect()
    }

    /// Outline of the mesh at the given height.
    pub fn rim(&self, mesh: &Mesh, height: f32) -> Rim {
        let flats = (self.candidates(height).iter())
            .filter_map(|&face| coplanar_face(mesh, &self.transformed_points, face, height))
            .collect();
        Rim::from_crossings(height, &self.intersect_plane(mesh, height)).with_flats(flats)
    }
}

/// Gets the min and max heights of the vertices of a face.
fn triangle_bounds(mesh: &Mesh, points: &[Pos], face: usize) -> (f32, f32) {
    let heights = mesh.face(face).map(|x| points[x as usize].z);
    (
        heights[0].min(heights[1]).min(heights[2]),
        heights[0].max(heights[1]).max(heights[2]),
    )
}

#[cfg(test)]
mod tests {
    use crate::{builder::MeshBuilder, mesh::Mesh, Pos};

    use super::Segments;

    #[test]
    fn matches_brute_force() {
        let mut builder = MeshBuilder::new();
        builder.add_vertical_cylinder(Pos::new(5.0, 5.0, 1.0), 8.0, (3.0, 1.0), 24);
        builder.add_cube(Pos::new(10.0, 0.0, 0.0), Pos::new(2.0, 2.0, 4.0));
        let mut mesh = builder.build();
        mesh.set_position(Pos::new(0.0, 0.0, 2.0));

        let segments = Segments::from_mesh(&mesh, 10);
        for i in 0..40 {
            let height = i as f32 * 0.3 + 0.05;
            let fast = segments.intersect_plane(&mesh, height).len();
            let slow = mesh.intersect_plane(height).len();
            assert_eq!(fast, slow, "height {height}");
        }

        assert!(segments.candidates(-5.0).is_empty());
        assert!(segments.candidates(100.0).is_empty());
    }

    #[test]
    fn flat_mesh() {
        let mesh = Mesh::new(vec![Pos::zeros(), Pos::x(), Pos::y()], vec![[0, 1, 2]]);
        let segments = Segments::from_mesh(&mesh, 100);
        assert_eq!(segments.candidates(0.0), [0]);
        let rim = segments.rim(&mesh, 0.0);
        assert!(rim.loops.is_empty());
        assert_eq!(rim.flats.len(), 1);
    }
}
