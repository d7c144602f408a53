//! Machine independent description of what the print head should do. A
//! [`JobToolpath`] holds one [`LayerToolpath`] per physical layer, which in
//! turn holds one [`Toolpath`] per functional region of that layer.

use std::collections::{btree_map::Entry, BTreeMap};

use nalgebra::{Vector2, Vector3};

/// Number of steps per millimeter used when turning a layer height into a
/// [`LayerKey`].
pub const LAYER_KEY_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Non extruding travel. Encoders wrap these in a retract / unretract pair.
    Rapid(Vector3<f32>),
    /// Straight extruding move from the current position.
    Print(Vector3<f32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Prime,
    Skirt,
    Support,
    Shell,
    Lid,
    Infill,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toolpath {
    pub region: Region,
    pub extruder: u32,
    /// Only used to order regions when drawing a preview.
    pub priority: u32,
    pub z: f32,

    elements: Vec<Motion>,
    loop_start: Option<Vector3<f32>>,
}

/// Integer layer height, used so that heights that only differ by floating
/// point noise map to the same layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerKey(pub i64);

#[derive(Debug, Clone, Default)]
pub struct LayerToolpath {
    pub z: f32,
    pub paths: Vec<Toolpath>,
}

#[derive(Debug, Clone, Default)]
pub struct JobToolpath {
    layers: BTreeMap<LayerKey, LayerToolpath>,
    pub startup: Option<Toolpath>,
    pub shutdown: Option<Toolpath>,
}

impl Motion {
    pub fn target(&self) -> Vector3<f32> {
        match self {
            Motion::Rapid(pos) | Motion::Print(pos) => *pos,
        }
    }
}

impl Region {
    pub fn priority(&self) -> u32 {
        match self {
            Region::Prime => 0,
            Region::Skirt => 5,
            Region::Lid => 20,
            Region::Infill => 30,
            Region::Shell => 40,
            Region::Support => 60,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Region::Prime => "prime",
            Region::Skirt => "skirt",
            Region::Support => "support",
            Region::Shell => "shell",
            Region::Lid => "lid",
            Region::Infill => "infill",
        }
    }
}

impl Toolpath {
    pub fn new(region: Region, extruder: u32, z: f32) -> Self {
        Self {
            region,
            extruder,
            priority: region.priority(),
            z,

            elements: Vec::new(),
            loop_start: None,
        }
    }

    /// Travels to a new point without extruding and starts a new loop there.
    pub fn start_path(&mut self, point: Vector2<f32>) {
        let point = point.push(self.z);
        self.elements.push(Motion::Rapid(point));
        self.loop_start = Some(point);
    }

    /// Extrudes a line to the given point. Zero length moves are dropped.
    pub fn continue_path(&mut self, point: Vector2<f32>) {
        let point = point.push(self.z);
        if self.last_position() == Some(point) {
            return;
        }

        self.elements.push(Motion::Print(point));
    }

    /// Extrudes back to the start of the current loop.
    pub fn close_path(&mut self) {
        if let Some(start) = self.loop_start.take() {
            if self.last_position() != Some(start) {
                self.elements.push(Motion::Print(start));
            }
        }
    }

    /// Moves all elements of `other` to the end of this toolpath.
    pub fn append(&mut self, other: Toolpath) {
        self.elements.extend(other.elements);
        self.loop_start = None;
    }

    pub fn elements(&self) -> &[Motion] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn last_position(&self) -> Option<Vector3<f32>> {
        self.elements.last().map(Motion::target)
    }

    /// Count of separate loops (runs of printing moves started by a rapid).
    pub fn loop_count(&self) -> usize {
        (self.elements.iter())
            .filter(|x| matches!(x, Motion::Rapid(_)))
            .count()
    }

    /// Total length of all printing moves.
    pub fn print_length(&self) -> f32 {
        let mut last: Option<Vector3<f32>> = None;
        let mut length = 0.0;

        for element in &self.elements {
            let target = element.target();
            if let (Motion::Print(_), Some(last)) = (element, last) {
                length += (target - last).magnitude();
            }
            last = Some(target);
        }

        length
    }
}

impl LayerKey {
    pub fn from_z(z: f64) -> Self {
        Self((z * LAYER_KEY_SCALE).round() as i64)
    }

    pub fn z(&self) -> f64 {
        self.0 as f64 / LAYER_KEY_SCALE
    }
}

impl LayerToolpath {
    /// Adds a toolpath to the layer, ignoring it if it has no moves.
    pub fn add(&mut self, toolpath: Toolpath) {
        if !toolpath.is_empty() {
            self.paths.push(toolpath);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Toolpaths sorted by paint priority, lowest first. Motion order is not
    /// affected.
    pub fn paint_order(&self) -> Vec<&Toolpath> {
        let mut paths = self.paths.iter().collect::<Vec<_>>();
        paths.sort_by_key(|x| x.priority);
        paths
    }
}

impl JobToolpath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the layer at the given height, creating it if needed.
    pub fn create_layer(&mut self, z: f32) -> &mut LayerToolpath {
        match self.layers.entry(LayerKey::from_z(z as f64)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(LayerToolpath {
                z,
                paths: Vec::new(),
            }),
        }
    }

    pub fn find_layer(&self, z: f32) -> Option<&LayerToolpath> {
        self.layers.get(&LayerKey::from_z(z as f64))
    }

    /// Layers in ascending height.
    pub fn layers(&self) -> impl Iterator<Item = (&LayerKey, &LayerToolpath)> {
        self.layers.iter()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}
