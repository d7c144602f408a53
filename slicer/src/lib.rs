//! Turns a triangle mesh into per layer toolpaths for a filament printer.
//! Start with [`slicer::Slicer`], which cuts the [`mesh::Mesh`] into layers
//! and derives shells, lids, infill and support from raster masks of those
//! layers.

use nalgebra::Vector3;

pub mod builder;
pub mod cross_section;
pub mod format;
pub mod half_edge;
pub mod mesh;
pub mod raster;
pub mod segments;
pub mod slicer;
pub mod supports;

pub type Pos = Vector3<f32>;
