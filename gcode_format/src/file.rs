use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use common::{
    config::SliceConfig,
    misc::human_duration,
    toolpath::{JobToolpath, LayerToolpath, Motion, Toolpath},
};
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::writer::{GcodeWriter, WriterSettings};

/// Print feedrate is never slowed below this share of the configured value.
const MIN_FEEDRATE_SCALE: f64 = 0.1;

/// Turns a whole [`JobToolpath`] into G-code.
pub struct GcodeFile<'a> {
    job: &'a JobToolpath,
    settings: WriterSettings,
    minimum_layer_time: f64,
    generator: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeStats {
    pub layers: usize,
    pub print_time: Duration,
    /// Millimeters of filament fed over the whole job.
    pub filament: f64,
}

impl<'a> GcodeFile<'a> {
    pub fn new(job: &'a JobToolpath, config: &SliceConfig) -> Self {
        Self {
            job,
            settings: WriterSettings::from_config(config),
            minimum_layer_time: config.gcode.minimum_layer_time as f64,
            generator: format!("slicer {}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    pub fn serialize<W: Write>(&self, out: W) -> Result<(EncodeStats, W)> {
        let mut gcode = GcodeWriter::new(out, self.settings.clone());
        let mut filament = 0.0;

        gcode.send_init_sequence(&self.generator)?;

        if let Some(startup) = &self.job.startup {
            gcode.comment("startup")?;
            filament += write_toolpath(&mut gcode, startup)?;
        }

        for (_, layer) in self.job.layers() {
            gcode.begin_layer(layer.z)?;
            gcode.set_print_feedrate(self.layer_feedrate(&gcode, layer));

            for toolpath in &layer.paths {
                filament += write_toolpath(&mut gcode, toolpath)?;
            }

            debug!(
                "Encoded layer at z={} ({:.1}s)",
                layer.z,
                gcode.layer_time()
            );
        }

        gcode.set_print_feedrate(self.settings.print_feedrate);
        if let Some(shutdown) = &self.job.shutdown {
            gcode.comment("shutdown")?;
            filament += write_toolpath(&mut gcode, shutdown)?;
        }

        gcode.send_shutdown_sequence()?;

        let print_time = Duration::from_secs_f64(gcode.total_time());
        gcode.comment(&format!(
            "estimated print time: {}",
            human_duration(print_time)
        ))?;

        let stats = EncodeStats {
            layers: self.job.layer_count(),
            print_time,
            filament,
        };
        Ok((stats, gcode.into_inner()))
    }

    /// Writes the G-code to `path`. Output goes to a temporary file next to
    /// the destination that only replaces it once everything was written.
    pub fn save(&self, path: &Path) -> Result<EncodeStats> {
        let now = Instant::now();
        let partial = partial_path(path);

        let result = (|| -> Result<EncodeStats> {
            let file = File::create(&partial)
                .with_context(|| format!("Can't open `{}` for writing", partial.display()))?;
            let (stats, mut out) = self.serialize(BufWriter::new(file))?;
            out.flush()?;
            drop(out);

            fs::rename(&partial, path)
                .with_context(|| format!("Can't move G-code into `{}`", path.display()))?;
            Ok(stats)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }

        let stats = result?;
        info!(
            "Saved {} layers to `{}` in {}. Estimated print time {}, {:.1}mm of filament",
            stats.layers,
            path.display(),
            human_duration(now.elapsed()),
            human_duration(stats.print_time),
            stats.filament
        );
        Ok(stats)
    }

    /// Picks the print feedrate for a layer so that it takes at least the
    /// minimum layer time.
    fn layer_feedrate<W: Write>(&self, gcode: &GcodeWriter<W>, layer: &LayerToolpath) -> f64 {
        let feedrate = self.settings.print_feedrate;
        let estimate = estimate_layer_time(&self.settings, gcode.position(), layer);
        if estimate <= 0.0 || estimate >= self.minimum_layer_time {
            return feedrate;
        }

        let scale = (estimate / self.minimum_layer_time).max(MIN_FEEDRATE_SCALE);
        feedrate * scale
    }
}

/// Sends every move of a toolpath, returning the filament it used.
fn write_toolpath<W: Write>(gcode: &mut GcodeWriter<W>, toolpath: &Toolpath) -> Result<f64> {
    gcode.request_tool(toolpath.extruder)?;

    let start = gcode.extrusion();
    let mut used = 0.0;
    for element in toolpath.elements() {
        let target = element.target().map(|x| x as f64);
        match element {
            Motion::Rapid(_) => gcode.rapid_move(target)?,
            Motion::Print(_) => {
                let before = gcode.extrusion();
                gcode.print_move(target)?;
                used += gcode.extrusion() - before;
            }
        }
    }

    debug_assert!(gcode.extrusion() >= start);
    Ok(used)
}

/// Seconds needed to print a layer at the unscaled feedrates.
fn estimate_layer_time(
    settings: &WriterSettings,
    start: Vector3<f64>,
    layer: &LayerToolpath,
) -> f64 {
    let mut position = start;
    let mut minutes = 0.0;

    for element in layer.paths.iter().flat_map(|x| x.elements()) {
        let target = element.target().map(|x| x as f64);
        let distance = (target - position).magnitude();
        minutes += match element {
            Motion::Rapid(_) => {
                distance / settings.rapid_feedrate
                    + 2.0 * settings.retract_distance / settings.retract_feedrate
            }
            Motion::Print(_) => distance / settings.print_feedrate,
        };
        position = target;
    }

    minutes * 60.0
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use common::{
        config::SliceConfig,
        toolpath::{JobToolpath, Region, Toolpath},
    };
    use nalgebra::Vector2;
    use proptest::prelude::*;

    use super::*;
    use crate::summary::GcodeSummary;

    fn square(z: f32, size: f32) -> Toolpath {
        let mut path = Toolpath::new(Region::Shell, 0, z);
        path.start_path(Vector2::new(0.0, 0.0));
        path.continue_path(Vector2::new(size, 0.0));
        path.continue_path(Vector2::new(size, size));
        path.continue_path(Vector2::new(0.0, size));
        path.close_path();
        path
    }

    fn job(layers: usize) -> JobToolpath {
        let mut job = JobToolpath::new();
        for i in 0..layers {
            let z = (i + 1) as f32 * 0.3;
            let layer = job.create_layer(z);
            layer.add(square(z, 50.0));
            layer.add(square(z, 40.0));
        }
        job
    }

    fn encode(job: &JobToolpath, config: &SliceConfig) -> (EncodeStats, String) {
        let (stats, out) = GcodeFile::new(job, config)
            .with_generator("test")
            .serialize(Vec::new())
            .unwrap();
        (stats, String::from_utf8(out).unwrap())
    }

    #[test]
    fn extrusion_resets_every_layer() {
        let (stats, text) = encode(&job(3), &SliceConfig::default());
        let summary = GcodeSummary::parse(&text);

        assert_eq!(stats.layers, 3);
        assert_eq!(summary.layers.len(), 3);
        for layer in &summary.layers {
            assert!(layer.reset, "layer at {} is missing its extruder reset", layer.z);
            assert!(
                layer.print_extrusion.windows(2).all(|x| x[0] <= x[1]),
                "extrusion went backwards at z={}",
                layer.z
            );
        }

        let factor = SliceConfig::default().extrusion_factor() as f64;
        let expected = (200.0 + 160.0) / factor;
        let last = *summary.layers[0].print_extrusion.last().unwrap();
        assert!((last - expected).abs() < 1e-4, "{last} != {expected}");
        assert!((stats.filament - expected * 3.0).abs() < 1e-3);
    }

    #[test]
    fn ends_with_shutdown() {
        let (_, text) = encode(&job(1), &SliceConfig::default());
        let lines = text.lines().collect::<Vec<_>>();
        let home = lines.iter().position(|x| *x == "G28 X0 Y0 ; home X and Y axis");
        assert!(home.is_some());
        assert_eq!(lines[lines.len() - 2], "M300 S523.251 P100 ; beep");
        assert!(lines[lines.len() - 1].starts_with("; estimated print time: "));
    }

    #[test]
    fn short_layers_are_slowed_down() {
        let mut job = JobToolpath::new();
        job.create_layer(0.3).add(square(0.3, 5.0));

        let (_, text) = encode(&job, &SliceConfig::default());
        let slowed = text
            .lines()
            .filter(|x| x.starts_with("G1 X") || x.starts_with("G1 Y"))
            .any(|x| x.contains(" F"));
        assert!(slowed, "expected a reduced print feedrate\n{text}");

        let mut config = SliceConfig::default();
        config.gcode.minimum_layer_time = 0.0;
        let (_, text) = encode(&job, &config);
        assert!(!text.contains("F180.0"));
    }

    #[test]
    fn extruder_changes_emit_tool_select() {
        let mut job = job(1);
        let mut support = square(0.3, 10.0);
        support.extruder = 1;
        job.create_layer(0.3).add(support);

        let (_, text) = encode(&job, &SliceConfig::default());
        assert_eq!(text.lines().filter(|x| *x == "T1").count(), 1);
    }

    #[test]
    fn save_replaces_file_atomically() {
        let dir = std::env::temp_dir().join(format!("gcode_format_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.gcode");

        let stats = GcodeFile::new(&job(2), &SliceConfig::default())
            .save(&path)
            .unwrap();
        assert_eq!(stats.layers, 2);
        assert!(path.exists());
        assert!(!partial_path(&path).exists());

        let missing = dir.join("missing").join("out.gcode");
        let result = GcodeFile::new(&job(1), &SliceConfig::default()).save(&missing);
        assert!(result.is_err());
        assert!(!missing.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    proptest! {
        #[test]
        fn extrusion_never_decreases(
            strokes in proptest::collection::vec(
                proptest::collection::vec((0.0_f32..200.0, 0.0_f32..200.0), 2..8),
                1..6,
            )
        ) {
            let mut job = JobToolpath::new();
            for z in [0.3, 0.6] {
                let layer = job.create_layer(z);
                for stroke in &strokes {
                    let mut path = Toolpath::new(Region::Infill, 0, z);
                    path.start_path(Vector2::new(stroke[0].0, stroke[0].1));
                    for &(x, y) in &stroke[1..] {
                        path.continue_path(Vector2::new(x, y));
                    }
                    layer.add(path);
                }
            }

            let (_, text) = encode(&job, &SliceConfig::default());
            let summary = GcodeSummary::parse(&text);
            prop_assert_eq!(summary.layers.len(), 2);
            for layer in &summary.layers {
                prop_assert!(layer.reset);
                prop_assert!(layer.print_extrusion.windows(2).all(|x| x[0] <= x[1]));
            }
        }
    }
}
