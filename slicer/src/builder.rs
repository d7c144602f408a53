use std::f32::consts::TAU;

use crate::{mesh::Mesh, Pos};

/// Builds simple meshes out of primitives. Faces are wound counter clockwise
/// when seen from outside.
pub struct MeshBuilder {
    vertices: Vec<Pos>,
    faces: Vec<[u32; 3]>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Shorthand for a mesh with a single axis aligned box.
    pub fn cube(min: Pos, size: Pos) -> Mesh {
        let mut builder = Self::new();
        builder.add_cube(min, size);
        builder.build()
    }

    pub fn add_vertex(&mut self, vertex: Pos) -> u32 {
        self.vertices.push(vertex);
        (self.vertices.len() - 1) as u32
    }

    pub fn add_face(&mut self, face: [u32; 3]) {
        self.faces.push(face);
    }

    pub fn add_quad(&mut self, quad: [u32; 4]) {
        self.add_face([quad[0], quad[1], quad[2]]);
        self.add_face([quad[2], quad[1], quad[3]]);
    }

    pub fn add_triangle(&mut self, points: [Pos; 3]) {
        let face = points.map(|x| self.add_vertex(x));
        self.add_face(face);
    }

    pub fn build(self) -> Mesh {
        Mesh::new(self.vertices, self.faces)
    }
}

impl MeshBuilder {
    pub fn add_cube(&mut self, min: Pos, size: Pos) {
        let corners = (0..8).map(|i| {
            let offset = Pos::new((i & 1) as f32, (i >> 1 & 1) as f32, (i >> 2 & 1) as f32);
            self.add_vertex(min + offset.component_mul(&size))
        });
        let v = corners.collect::<Vec<_>>();

        for [a, b, c] in [
            [0, 2, 1],
            [1, 2, 3],
            [4, 5, 6],
            [5, 7, 6],
            [0, 1, 4],
            [1, 5, 4],
            [2, 6, 3],
            [3, 6, 7],
            [0, 4, 2],
            [2, 4, 6],
            [1, 3, 5],
            [3, 7, 5],
        ] {
            self.add_face([v[a], v[b], v[c]]);
        }
    }

    /// Adds a closed cylinder standing on `bottom`. Using a radius of zero on
    /// one end makes a cone.
    pub fn add_vertical_cylinder(
        &mut self,
        bottom: Pos,
        height: f32,
        (bottom_radius, top_radius): (f32, f32),
        precision: u32,
    ) {
        let top = bottom + Pos::new(0.0, 0.0, height);
        let bottom_center = self.add_vertex(bottom);
        let top_center = self.add_vertex(top);

        let ring = (0..precision)
            .map(|i| {
                let angle = TAU * (i as f32) / (precision as f32);
                let normal = Pos::new(angle.sin(), angle.cos(), 0.0);
                (
                    self.add_vertex(top + normal * top_radius),
                    self.add_vertex(bottom + normal * bottom_radius),
                )
            })
            .collect::<Vec<_>>();

        for (i, &(top, bottom)) in ring.iter().enumerate() {
            let (last_top, last_bottom) = ring[(i + ring.len() - 1) % ring.len()];
            self.add_quad([last_bottom, last_top, bottom, top]);
            self.add_face([top, last_top, top_center]);
            self.add_face([bottom_center, last_bottom, bottom]);
        }
    }
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}
