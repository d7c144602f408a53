use std::time::Instant;

use common::{
    config::SliceConfig,
    misc::human_duration,
    progress::{LayerProgress, Progress, ProgressSink},
    toolpath::{JobToolpath, Region, Toolpath},
};
use nalgebra::Vector2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    mesh::Mesh,
    raster::{Mask, RasterGrid, SupportShadow},
    segments::Segments,
};

mod layer;
mod synthesize;

pub use layer::{LayerRecord, LayerRegions};

/// Number of height bands used to find the faces crossing a slice plane.
const SEGMENT_LAYERS: usize = 100;
/// Distance from the plate edges to the priming line.
const PRIME_MARGIN: f32 = 5.0;

/// A slicing session for one mesh. Layers are generated lazily and cached
/// until the configuration or mesh changes.
pub struct Slicer {
    config: SliceConfig,
    mesh: Mesh,

    grid: RasterGrid,
    segments: Segments,
    layers: Vec<Option<LayerRecord>>,
    shadow: Option<SupportShadow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    Complete { layers: usize },
    /// Stopped early. The layers finished before that are kept.
    Cancelled { layers: usize },
}

impl Slicer {
    pub fn new(config: SliceConfig, mesh: Mesh) -> Self {
        let segments = Segments::from_mesh(&mesh, SEGMENT_LAYERS);
        let mut slicer = Self {
            grid: RasterGrid::from_config(&config),
            config,
            mesh,

            segments,
            layers: Vec::new(),
            shadow: None,
        };
        slicer.purge();
        slicer
    }

    pub fn config(&self) -> &SliceConfig {
        &self.config
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    /// Replaces the configuration. Any change drops every cached layer.
    pub fn set_config(&mut self, config: SliceConfig) {
        if config != self.config {
            self.config = config;
            self.grid = RasterGrid::from_config(&self.config);
            self.purge();
        }
    }

    pub fn update_config(&mut self, update: impl FnOnce(&mut SliceConfig)) {
        let mut config = self.config.clone();
        update(&mut config);
        self.set_config(config);
    }

    pub fn set_mesh(&mut self, mesh: Mesh) {
        self.segments = Segments::from_mesh(&mesh, SEGMENT_LAYERS);
        self.mesh = mesh;
        self.purge();
    }

    /// Drops all cached layers and support data.
    pub fn purge(&mut self) {
        let count = self.layer_count();
        self.layers.clear();
        self.layers.resize_with(count, || None);
        self.shadow = None;
    }

    /// Number of layers needed to reach the top of the mesh, limited by the
    /// height of the build volume.
    pub fn layer_count(&self) -> usize {
        if self.mesh.face_count() == 0 || self.config.layer_height <= 0.0 {
            return 0;
        }

        let height = self.segments.points().iter().fold(0_f32, |max, x| max.max(x.z));
        let height = height.min(self.config.platform_size.z);
        // Tolerance so a model exactly n layers tall doesn't get n + 1.
        (height / self.config.layer_height - 1e-3).ceil().max(0.0) as usize
    }

    /// Gets a finished layer, generating it and whatever it depends on if
    /// needed.
    pub fn layer(&mut self, index: usize) -> Option<&LayerRecord> {
        self.ensure_layer(index);
        self.cached_layer(index)
    }

    /// Gets a layer only if it has already been generated, even partially.
    pub fn cached_layer(&self, index: usize) -> Option<&LayerRecord> {
        self.layers.get(index).and_then(Option::as_ref)
    }

    pub fn cached_layers(&self) -> impl Iterator<Item = &LayerRecord> {
        self.layers.iter().flatten()
    }

    fn core(&self, index: isize) -> Option<&Mask> {
        let index = usize::try_from(index).ok()?;
        self.cached_layer(index).map(|x| &x.core)
    }

    fn ensure_core(&mut self, index: usize) {
        if matches!(self.layers.get(index), Some(None)) {
            self.layers[index] = Some(self.generate_core(index));
        }
    }

    fn ensure_shadow(&mut self) {
        if self.config.support.enabled && self.shadow.is_none() {
            let start = Instant::now();
            let shadow =
                SupportShadow::build(&self.grid, &self.mesh, self.segments.points(), &self.config);
            info!(
                "Built support shadow with {} surfaces in {}",
                shadow.surface_count(),
                human_duration(start.elapsed())
            );
            self.shadow = Some(shadow);
        }
    }

    fn ensure_layer(&mut self, index: usize) {
        if index >= self.layers.len() || self.cached_layer(index).is_some_and(|x| x.is_complete())
        {
            return;
        }

        let window = self.config.lids as usize;
        let end = (index + window).min(self.layers.len() - 1);
        for neighbor in index.saturating_sub(window)..=end {
            self.ensure_core(neighbor);
        }
        self.ensure_shadow();

        let regions = self.generate_regions(index);
        if let Some(record) = self.layers[index].as_mut() {
            record.regions = Some(regions);
        }
    }

    /// Generates every layer in order. After each one the sink is told about
    /// the progress and can stop the loop.
    pub fn slice(&mut self, sink: &mut impl ProgressSink) -> SliceStatus {
        let start = Instant::now();
        let total = self.layers.len();
        info!("Slicing {total} layers");

        for index in 0..total {
            self.ensure_layer(index);
            debug!("Finished layer {index}");

            let progress = LayerProgress::new(index, total, self.config.print_z(index));
            if sink.report(progress) {
                info!("Slicing cancelled after {} layers", index + 1);
                return SliceStatus::Cancelled { layers: index + 1 };
            }
        }

        info!("Sliced {total} layers in {}", human_duration(start.elapsed()));
        SliceStatus::Complete { layers: total }
    }

    /// Generates every layer on the rayon thread pool. All cores are made
    /// first so the second pass can read neighbors without waiting on them.
    pub fn slice_parallel(&mut self, progress: &Progress) -> SliceStatus {
        let start = Instant::now();
        let total = self.layers.len();
        progress.set_total(total as u64);
        progress.set_complete(self.cached_layers().filter(|x| x.is_complete()).count() as u64);
        info!("Slicing {total} layers in parallel");

        let this = &*self;
        let cores = (0..total)
            .into_par_iter()
            .filter(|&i| this.layers[i].is_none())
            .map(|i| (!progress.cancelled()).then(|| (i, this.generate_core(i))))
            .collect::<Vec<_>>();
        for (i, record) in cores.into_iter().flatten() {
            self.layers[i] = Some(record);
        }

        if !progress.cancelled() {
            self.ensure_shadow();
        }

        let this = &*self;
        let regions = (0..total)
            .into_par_iter()
            .filter(|&i| this.cached_layer(i).is_some_and(|x| !x.is_complete()))
            .map(|i| {
                if progress.cancelled() {
                    return None;
                }

                let regions = this.generate_regions(i);
                progress.add_complete(1);
                Some((i, regions))
            })
            .collect::<Vec<_>>();
        for (i, regions) in regions.into_iter().flatten() {
            if let Some(record) = self.layers[i].as_mut() {
                record.regions = Some(regions);
            }
        }

        let done = self.cached_layers().filter(|x| x.is_complete()).count();
        if progress.cancelled() {
            info!("Slicing cancelled with {done} of {total} layers done");
            return SliceStatus::Cancelled { layers: done };
        }

        info!("Sliced {total} layers in {}", human_duration(start.elapsed()));
        SliceStatus::Complete { layers: done }
    }

    /// Collects all finished layers into a job. A fresh job is built on every
    /// call.
    pub fn toolpath(&self) -> JobToolpath {
        let mut job = JobToolpath::new();
        for record in self.cached_layers().filter(|x| x.is_complete()) {
            let layer = record.toolpath();
            if !layer.is_empty() {
                *job.create_layer(record.print_z) = layer;
            }
        }

        if self.config.prime_line {
            job.startup = Some(self.prime_line());
        }

        job
    }

    /// Straight line along the front of the plate to get the filament
    /// flowing before the first layer.
    fn prime_line(&self) -> Toolpath {
        let mut path = Toolpath::new(
            Region::Prime,
            self.config.model_extruder,
            self.config.print_z(0),
        );
        let length = (self.config.platform_size.x - PRIME_MARGIN).max(PRIME_MARGIN);
        path.start_path(Vector2::repeat(PRIME_MARGIN));
        path.continue_path(Vector2::new(length, PRIME_MARGIN));
        path
    }
}
