use std::collections::{HashMap, HashSet};

use crate::mesh::Mesh;

/// Edge connectivity of a mesh. Every face contributes three half edges, two
/// faces sharing an edge have their half edges linked as twins. A half edge
/// without a twin lies on the boundary of a hole.
#[derive(Clone)]
pub struct HalfEdgeMesh {
    half_edges: Vec<HalfEdge>,
}

#[derive(Debug, Clone)]
pub struct HalfEdge {
    pub origin_vertex: u32,
    pub vertex: u32,
    pub face: u32,

    pub next: u32,
    pub prev: u32,
    pub twin: Option<u32>,
}

/// An undirected edge with the faces on either side of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub vertices: [u32; 2],
    pub faces: [Option<u32>; 2],
}

impl HalfEdgeMesh {
    pub fn build(mesh: &Mesh) -> Self {
        let mut half_edges = Vec::with_capacity(mesh.face_count() * 3);
        let mut edge_map = HashMap::new();

        for (face_idx, face) in mesh.faces().iter().enumerate() {
            let first_edge = half_edges.len() as u32;
            for i in 0..3 {
                let next = first_edge + (i as u32 + 1) % 3;
                let prev = first_edge + (i as u32 + 2) % 3;

                half_edges.push(HalfEdge {
                    origin_vertex: face[i],
                    vertex: face[(i + 1) % 3],
                    face: face_idx as u32,

                    next,
                    prev,
                    twin: None,
                });
                edge_map.insert((face[i], face[(i + 1) % 3]), first_edge + i as u32);
            }
        }

        for edge in half_edges.iter_mut() {
            edge.twin = edge_map.get(&(edge.vertex, edge.origin_vertex)).copied();
        }

        Self { half_edges }
    }

    pub fn half_edges(&self) -> &[HalfEdge] {
        &self.half_edges
    }

    pub fn half_edge_count(&self) -> usize {
        self.half_edges.len()
    }

    pub fn get_edge(&self, idx: u32) -> &HalfEdge {
        &self.half_edges[idx as usize]
    }

    /// Returns the vertices connected to the origin of the given half edge.
    /// On an open fan only the vertices reachable before hitting the
    /// boundary are returned.
    pub fn connected_vertices(&self, start_edge: u32) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut edge = start_edge;

        loop {
            if !seen.insert(edge) {
                break;
            }

            let this = &self.half_edges[edge as usize];
            out.push(this.vertex);
            // The previous half edge of the face ends at our origin, so its
            // origin is also a neighbor.
            out.push(self.half_edges[this.prev as usize].origin_vertex);

            let Some(twin) = self.half_edges[this.prev as usize].twin else {
                break;
            };
            edge = twin;
            if edge == start_edge {
                break;
            }
        }

        out.sort_unstable();
        out.dedup();
        out
    }

    /// Collects every undirected edge once.
    pub fn edges(&self) -> Vec<Edge> {
        let mut out = Vec::new();
        for (idx, edge) in self.half_edges.iter().enumerate() {
            match edge.twin {
                Some(twin) if (twin as usize) < idx => continue,
                twin => out.push(Edge {
                    vertices: [edge.origin_vertex, edge.vertex],
                    faces: [
                        Some(edge.face),
                        twin.map(|x| self.half_edges[x as usize].face),
                    ],
                }),
            }
        }
        out
    }

    /// Walks the boundaries of all holes, returning the vertices of each in
    /// the direction of the half edges around it.
    pub fn boundary_loops(&self) -> Vec<Vec<u32>> {
        let boundary = (self.half_edges.iter().enumerate())
            .filter(|(_, x)| x.twin.is_none())
            .map(|(idx, x)| (x.origin_vertex, idx))
            .collect::<HashMap<_, _>>();

        let mut seen = HashSet::new();
        let mut loops = Vec::new();

        for &start in boundary.values() {
            if seen.contains(&start) {
                continue;
            }

            let mut vertices = Vec::new();
            let mut edge = start;
            let closed = loop {
                if !seen.insert(edge) {
                    break edge == start;
                }

                let half_edge = &self.half_edges[edge];
                vertices.push(half_edge.origin_vertex);
                match boundary.get(&half_edge.vertex) {
                    Some(&next) => edge = next,
                    None => break false,
                }
            };

            if closed {
                loops.push(vertices);
            }
        }

        loops
    }
}
