use common::toolpath::{LayerKey, LayerToolpath, Toolpath};

use crate::raster::Mask;

/// Everything generated for a single layer. The core mask and shells only
/// depend on the layer itself, the other regions also look at neighboring
/// layers and are filled in later.
pub struct LayerRecord {
    pub index: usize,
    /// Height the mesh was cut at.
    pub slice_z: f32,
    /// Height the layer is printed at.
    pub print_z: f32,

    /// Cross section with all shells removed.
    pub core: Mask,
    /// Set when the outline had gaps that were bridged.
    pub rim_incomplete: bool,
    pub shell: Option<Toolpath>,

    pub regions: Option<LayerRegions>,
}

/// Regions that need the cores of surrounding layers.
#[derive(Debug, Clone, Default)]
pub struct LayerRegions {
    pub skirt: Option<Toolpath>,
    pub support: Option<Toolpath>,
    pub lid: Option<Toolpath>,
    pub infill: Option<Toolpath>,
}

impl LayerRecord {
    pub fn key(&self) -> LayerKey {
        LayerKey::from_z(self.print_z as f64)
    }

    /// If every region of this layer has been generated.
    pub fn is_complete(&self) -> bool {
        self.regions.is_some()
    }

    /// Toolpaths in the order they get printed.
    pub fn paths(&self) -> impl Iterator<Item = &Toolpath> {
        let regions = self.regions.as_ref();
        [
            regions.and_then(|x| x.skirt.as_ref()),
            regions.and_then(|x| x.support.as_ref()),
            self.shell.as_ref(),
            regions.and_then(|x| x.lid.as_ref()),
            regions.and_then(|x| x.infill.as_ref()),
        ]
        .into_iter()
        .flatten()
    }

    pub fn toolpath(&self) -> LayerToolpath {
        let mut layer = LayerToolpath {
            z: self.print_z,
            paths: Vec::new(),
        };

        for path in self.paths() {
            layer.add(path.clone());
        }

        layer
    }
}

#[cfg(test)]
mod tests {
    use common::toolpath::{Region, Toolpath};
    use nalgebra::Vector2;

    use crate::raster::{Mask, RasterGrid};

    use super::{LayerRecord, LayerRegions};

    fn path(region: Region) -> Option<Toolpath> {
        let mut path = Toolpath::new(region, 0, 0.6);
        path.start_path(Vector2::zeros());
        path.continue_path(Vector2::x());
        Some(path)
    }

    #[test]
    fn motion_order() {
        let mut record = LayerRecord {
            index: 1,
            slice_z: 0.45,
            print_z: 0.6,
            core: Mask::new(RasterGrid::new(Vector2::new(4, 4), 1.0)),
            rim_incomplete: false,
            shell: path(Region::Shell),
            regions: None,
        };
        assert!(!record.is_complete());
        assert_eq!(record.toolpath().paths.len(), 1);

        record.regions = Some(LayerRegions {
            skirt: path(Region::Skirt),
            support: path(Region::Support),
            lid: None,
            infill: path(Region::Infill),
        });

        let layer = record.toolpath();
        let order = layer.paths.iter().map(|x| x.region).collect::<Vec<_>>();
        assert_eq!(
            order,
            [Region::Skirt, Region::Support, Region::Shell, Region::Infill]
        );
        assert_eq!(record.key().0, 600);
    }
}
