//! Turns the cross section of a layer, and those around it, into toolpaths.

use common::{
    config::{LidPattern, MachineKind},
    toolpath::{Region, Toolpath},
};
use tracing::{debug, warn};

use crate::raster::{fill_triangles, Mask};

use super::{LayerRecord, LayerRegions, Slicer};

/// Upper bound on concentric lid rings, in case a mask never erodes away.
const MAX_LID_RINGS: usize = 300;
/// Densities at or below this are treated as off.
const MIN_DENSITY: f32 = 0.0001;

impl Slicer {
    /// Cuts the mesh at the given layer and peels the shells off of the
    /// cross section. Only looks at the layer itself.
    pub(super) fn generate_core(&self, index: usize) -> LayerRecord {
        match self.config.machine {
            MachineKind::Fdm => self.fdm_core(index),
        }
    }

    /// Generates the regions that depend on neighboring cores. Those cores
    /// must already be cached, missing ones count as empty.
    pub(super) fn generate_regions(&self, index: usize) -> LayerRegions {
        match self.config.machine {
            MachineKind::Fdm => {
                let (lid, infill) = self.solid_regions(index);
                LayerRegions {
                    skirt: self.skirt(index),
                    support: self.support(index),
                    lid,
                    infill,
                }
            }
        }
    }

    fn fdm_core(&self, index: usize) -> LayerRecord {
        let config = &self.config;
        let (slice_z, print_z) = (config.slice_z(index), config.print_z(index));
        let width = config.nozzle_diameter;

        let rim = self.segments.rim(&self.mesh, slice_z);
        if !rim.is_complete() {
            warn!("Layer {index} has an incomplete outline");
        }

        let mut core = rim.fill(&self.grid);
        let mut shells = Vec::new();
        for shell in 0..config.shells {
            // The first bead is centered half a width in from the outline,
            // each one after that a full width further in.
            let distance = if shell == 0 { width / 2.0 } else { width };
            match core.toolpath_from_lasso_and_contract(
                print_z,
                distance,
                Region::Shell,
                config.model_extruder,
            ) {
                Some(path) => shells.push(path),
                None => break,
            }
        }

        if config.shells > 0 {
            core.contract(width / 2.0);
        }

        let shell = (!shells.is_empty()).then(|| {
            let mut out = Toolpath::new(Region::Shell, config.model_extruder, print_z);
            for path in shells.into_iter().rev() {
                out.append(path);
            }
            out
        });

        debug!("Layer {index} at z={slice_z} has a core of {} mm²", core.area());
        LayerRecord {
            index,
            slice_z,
            print_z,

            core,
            rim_incomplete: !rim.is_complete(),
            shell,

            regions: None,
        }
    }

    /// Splits the core into a solid skin where the model is about to end in
    /// either direction and sparse infill everywhere else. Returns the lid
    /// and infill masks.
    pub(super) fn split_core(&self, index: usize) -> Option<(Mask, Mask)> {
        let core = self.core(index as isize)?;
        let window = self.config.lids as isize;
        if window == 0 {
            return Some((Mask::new(self.grid), core.clone()));
        }

        let index = index as isize;
        let above = self.intersect_cores(index + 1..=index + window);
        let below = self.intersect_cores(index - window..=index - 1);

        let mut interior = above;
        interior.logic_and(&below);

        let mut lid = core.clone();
        lid.logic_and_not(&interior);
        let mut infill = core.clone();
        infill.logic_and(&interior);

        Some((lid, infill))
    }

    /// AND of the cores of all the given layers. Layers that don't exist are
    /// empty, so any gap makes the whole result empty.
    fn intersect_cores(&self, layers: impl Iterator<Item = isize>) -> Mask {
        let mut out = Mask::new(self.grid);
        out.fill(255);

        for layer in layers {
            match self.core(layer) {
                Some(core) => out.logic_and(core),
                None => return Mask::new(self.grid),
            }
        }

        out
    }

    fn solid_regions(&self, index: usize) -> (Option<Toolpath>, Option<Toolpath>) {
        let Some((lid, mut infill)) = self.split_core(index) else {
            return (None, None);
        };

        let config = &self.config;
        let print_z = config.print_z(index);
        let width = config.nozzle_diameter;
        let extruder = config.model_extruder;

        let lid = (config.lids > 0).then(|| self.lid(index, lid)).flatten();
        let infill = (config.infill_density > MIN_DENSITY).then(|| {
            let spacing = config.pattern_spacing(config.infill_density);
            infill.overlay_infill_pattern(index, width, spacing);
            infill.toolpath_from_lasso(print_z, Region::Infill, extruder)
        });

        (lid, infill.flatten())
    }

    fn lid(&self, index: usize, mut mask: Mask) -> Option<Toolpath> {
        let config = &self.config;
        let print_z = config.print_z(index);
        let width = config.nozzle_diameter;
        let extruder = config.model_extruder;

        match config.lid_pattern {
            LidPattern::Zigzag => {
                mask.overlay_infill_pattern(index, width, config.pattern_spacing(100.0));
                mask.toolpath_from_lasso(print_z, Region::Lid, extruder)
            }
            LidPattern::Concentric => {
                let mut rings = Vec::new();
                let mut distance = width / 2.0;
                while rings.len() < MAX_LID_RINGS {
                    match mask.toolpath_from_lasso_and_contract(print_z, distance, Region::Lid, extruder)
                    {
                        Some(path) => rings.push(path),
                        None => break,
                    }
                    distance = width;
                }

                let mut out = Toolpath::new(Region::Lid, extruder, print_z);
                for ring in rings {
                    out.append(ring);
                }
                (!out.is_empty()).then_some(out)
            }
        }
    }

    /// Support under overhangs at this layer, kept away from the model.
    fn support(&self, index: usize) -> Option<Toolpath> {
        let config = &self.config;
        let support = &config.support;
        let shadow = self.shadow.as_ref().filter(|_| support.enabled)?;

        let width = config.nozzle_diameter;
        let clip_z = config.slice_z(index) + support.top_gap as f32 * config.layer_height;

        let mut mask = Mask::new(self.grid);
        shadow.render(clip_z, &mut mask);
        if mask.is_empty() {
            return None;
        }

        mask.contract(width / 2.0 + support.side_gap);

        // The first layer is solid so the columns stick to the plate.
        let density = if index == 0 { 100.0 } else { support.density };
        if density <= MIN_DENSITY {
            return None;
        }

        let spacing = config.pattern_spacing(density);
        mask.overlay_infill_pattern(index, width, spacing);
        mask.toolpath_from_lasso(config.print_z(index), Region::Support, support.extruder)
    }

    /// A few loops on the first layer around everything the model covers
    /// when seen from above, overhangs included.
    fn skirt(&self, index: usize) -> Option<Toolpath> {
        let config = &self.config;
        if index != 0 || !config.skirt || config.skirt_loops == 0 {
            return None;
        }

        let print_z = config.print_z(index);
        let extruder = config.model_extruder;
        let points = self.segments.points();
        let triangles = (self.mesh.faces().iter())
            .map(|face| face.map(|x| points[x as usize]))
            .collect::<Vec<_>>();

        let mut outline = fill_triangles(&self.grid, &triangles);
        outline.expand(config.skirt_distance);

        let mut skirt = Toolpath::new(Region::Skirt, extruder, print_z);
        for _ in 0..config.skirt_loops {
            match outline.toolpath_from_lasso_and_contract(
                print_z,
                config.nozzle_diameter,
                Region::Skirt,
                extruder,
            ) {
                Some(path) => skirt.append(path),
                None => break,
            }
        }

        (!skirt.is_empty()).then_some(skirt)
    }
}
