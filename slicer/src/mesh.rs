use std::{
    collections::{hash_map::Entry, HashMap},
    io::{BufReader, Read, Seek},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use nalgebra::{Matrix4, Vector3};
use tracing::{info, warn};

use crate::{half_edge::HalfEdgeMesh, Pos};

/// A mesh made of welded vertices and triangular faces. It can be scaled,
/// translated, and rotated.
#[derive(Debug, Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,

    transformation_matrix: Matrix4<f32>,

    position: Pos,
    scale: Pos,
    rotation: Pos,
}

#[derive(Debug)]
struct MeshInner {
    pub vertices: Box<[Pos]>,
    pub faces: Box<[[u32; 3]]>,
    pub normals: Box<[Pos]>,
}

impl Mesh {
    /// Creates a new mesh from the given vertices and faces. Vertices sharing
    /// a position are merged and faces that collapse because of it are
    /// dropped. The transformations are all identity by default.
    pub fn new(vertices: Vec<Pos>, faces: Vec<[u32; 3]>) -> Self {
        let (vertices, faces) = weld_vertices(&vertices, &faces);
        Self {
            inner: Arc::new(MeshInner::new(vertices, faces)),
            ..Default::default()
        }
    }

    pub fn vertices(&self) -> &[Pos] {
        self.inner.vertices.as_ref()
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        self.inner.faces.as_ref()
    }

    pub fn face(&self, index: usize) -> &[u32; 3] {
        &self.inner.faces[index]
    }

    /// Normal of a face in model space.
    pub fn normal(&self, index: usize) -> Pos {
        self.inner.normals[index]
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices().len()
    }

    pub fn face_count(&self) -> usize {
        self.faces().len()
    }

    pub fn half_edges(&self) -> HalfEdgeMesh {
        HalfEdgeMesh::build(self)
    }

    /// All vertices with the model transformation applied.
    pub fn transformed_vertices(&self) -> Vec<Pos> {
        (self.vertices().iter())
            .map(|x| self.transform(x))
            .collect()
    }

    /// Normal of a face in world space. Computed from the transformed
    /// vertices so that non-uniform scaling is handled correctly.
    pub fn world_normal(&self, points: &[Pos], index: usize) -> Pos {
        face_normal(points, self.face(index))
    }

    /// Intersect the mesh with a plane with linear time complexity. You
    /// should probably use the [`crate::segments::Segments`] struct as it can
    /// massively accelerate slicing of high face count meshes.
    pub fn intersect_plane(&self, height: f32) -> Vec<[Pos; 2]> {
        let points = self.transformed_vertices();
        (0..self.face_count())
            .filter_map(|face| crate::cross_section::triangle_crossing(self, &points, face, height))
            .map(|x| x.points)
            .collect()
    }

    pub fn is_manifold(&self) -> bool {
        let mut edges = HashMap::<_, u8>::new();

        for [a, b, c] in self.faces() {
            for (a, b) in [(a, b), (b, c), (c, a)] {
                *edges.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }

        edges.values().all(|&count| count == 2)
    }

    /// Closes holes whose boundary is made of exactly three edges by adding
    /// the missing face. Returns how many faces were added. Larger holes are
    /// left open and reported.
    pub fn fix_holes(&mut self) -> usize {
        let half_edges = self.half_edges();
        let loops = half_edges.boundary_loops();
        if loops.is_empty() {
            return 0;
        }

        let mut faces = self.faces().to_vec();
        let mut unfixed = 0;
        for boundary in &loops {
            match boundary.as_slice() {
                // The boundary runs along existing faces, so the new face has
                // to wind the other way around.
                &[a, b, c] => faces.push([a, c, b]),
                _ => unfixed += 1,
            }
        }

        let fixed = loops.len() - unfixed;
        if unfixed > 0 {
            warn!("Mesh has {unfixed} holes that can't be closed automatically");
        }
        if fixed > 0 {
            info!("Closed {fixed} small holes in mesh");
            self.inner = Arc::new(MeshInner::new(self.vertices().to_vec(), faces));
        }

        fixed
    }

    /// Updates the internal transformation matrices. This is called
    /// automatically if you use [`Mesh::set_position`], [`Mesh::set_scale`], or
    /// [`Mesh::set_rotation`].
    pub fn update_transformation_matrix(&mut self) {
        let scale = Matrix4::new_nonuniform_scaling(&self.scale);
        let rotation =
            Matrix4::from_euler_angles(self.rotation.x, self.rotation.y, self.rotation.z);
        let translation = Matrix4::new_translation(&self.position);

        self.transformation_matrix = translation * scale * rotation;
    }

    /// Transforms a point according to the models translation, scale, and rotation.
    pub fn transform(&self, pos: &Pos) -> Pos {
        (self.transformation_matrix * pos.push(1.0)).xyz()
    }

    /// Get the minimum and maximum of each component of every vertex in the
    /// model. These points define the bounding box of the model.
    pub fn bounds(&self) -> (Pos, Pos) {
        vertex_bounds(self.vertices(), &self.transformation_matrix)
    }
}

impl Mesh {
    /// Changes the position of the model, automatically updating the internal
    /// transformation matrix.
    pub fn set_position(&mut self, pos: Pos) {
        self.position = pos;
        self.update_transformation_matrix();
    }

    /// Gets the current position of the model.
    pub fn position(&self) -> Pos {
        self.position
    }

    /// Changes the current scale of the model, automatically updating the
    /// internal transformation matrix.
    pub fn set_scale(&mut self, scale: Pos) {
        self.scale = scale;
        self.update_transformation_matrix();
    }

    pub fn scale(&self) -> Pos {
        self.scale
    }

    /// Changes the current rotation of the model, using Euler angles in
    /// radians. The internal transformation matrix is automatically updated.
    pub fn set_rotation(&mut self, rotation: Pos) {
        self.rotation = rotation;
        self.update_transformation_matrix();
    }

    pub fn rotation(&self) -> Pos {
        self.rotation
    }

    /// Moves the model so its bounding box is centered on `center` in X and Y
    /// and rests on the build plate.
    pub fn place_on_plate(&mut self, center: nalgebra::Vector2<f32>) {
        let (min, max) = self.bounds();
        let offset = Pos::new(
            center.x - (min.x + max.x) / 2.0,
            center.y - (min.y + max.y) / 2.0,
            -min.z,
        );
        self.set_position(self.position + offset);
    }
}

impl MeshInner {
    fn new(vertices: Vec<Pos>, faces: Vec<[u32; 3]>) -> Self {
        let normals = (faces.iter())
            .map(|face| face_normal(&vertices, face))
            .collect();

        Self {
            vertices: vertices.into_boxed_slice(),
            faces: faces.into_boxed_slice(),
            normals,
        }
    }
}

/// Loads a mesh from a reader. Supported formats include `stl` and `obj`.
pub fn load_mesh<T: Read + Seek>(mut reader: T, format: &str) -> Result<Mesh> {
    let (vertices, faces) = match format.to_ascii_lowercase().as_str() {
        "stl" => {
            let model = stl_io::read_stl(&mut reader).context("Invalid STL file")?;
            let vertices = (model.vertices.iter())
                .map(|v| Pos::new(v[0], v[1], v[2]))
                .collect();
            let faces = (model.faces.iter())
                .map(|f| f.vertices.map(|x| x as u32))
                .collect();
            (vertices, faces)
        }
        "obj" => {
            let model: obj::Obj<obj::Position, u32> =
                obj::load_obj(BufReader::new(reader)).context("Invalid OBJ file")?;
            let vertices = (model.vertices.iter())
                .map(|v| Pos::from(v.position))
                .collect();
            let faces = (model.indices.chunks_exact(3))
                .map(|f| [f[0], f[1], f[2]])
                .collect();
            (vertices, faces)
        }
        _ => bail!("Unsupported mesh format `{format}`"),
    };

    Ok(Mesh::new(vertices, faces))
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            inner: Arc::new(MeshInner {
                vertices: Box::new([]),
                faces: Box::new([]),
                normals: Box::new([]),
            }),

            transformation_matrix: Matrix4::identity(),

            position: Pos::repeat(0.0),
            scale: Pos::repeat(1.0),
            rotation: Pos::repeat(0.0),
        }
    }
}

pub(crate) fn face_normal(points: &[Pos], face: &[u32; 3]) -> Pos {
    let [a, b, c] = face.map(|x| points[x as usize]);
    let normal = (b - a).cross(&(c - a));
    normal.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros)
}

/// Get the minimum and maximum of each component of every vertex.
fn vertex_bounds(vertices: &[Pos], transform: &Matrix4<f32>) -> (Pos, Pos) {
    vertices.iter().fold(
        (Pos::repeat(f32::MAX), Pos::repeat(f32::MIN)),
        |(min, max), v| {
            let v = (transform * v.push(1.0)).xyz();
            (min.inf(&v), max.sup(&v))
        },
    )
}

/// Merges vertices at identical positions, dropping faces that end up with
/// repeated corners.
fn weld_vertices(vertices: &[Pos], faces: &[[u32; 3]]) -> (Vec<Pos>, Vec<[u32; 3]>) {
    let mut lookup = HashMap::new();
    let mut welded = Vec::new();
    let mut remap = Vec::with_capacity(vertices.len());

    for vertex in vertices {
        // -0.0 and 0.0 are the same point
        let key = vertex.map(|x| (x + 0.0).to_bits());
        let index = match lookup.entry((key.x, key.y, key.z)) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                welded.push(*vertex);
                *entry.insert(welded.len() as u32 - 1)
            }
        };
        remap.push(index);
    }

    let faces = (faces.iter())
        .filter(|face| face.iter().all(|&x| (x as usize) < remap.len()))
        .map(|face| face.map(|x| remap[x as usize]))
        .filter(|[a, b, c]| a != b && b != c && c != a)
        .collect();

    (welded, faces)
}
