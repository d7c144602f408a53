use std::{fs, path::Path, str::FromStr};

use anyhow::{bail, Context, Result};
use nalgebra::{Vector2, Vector3};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SliceConfig {
    pub machine: MachineKind,

    pub platform_size: Vector3<f32>,
    /// Raster resolution used for every layer mask.
    pub pixels_per_mm: f32,
    pub layer_height: f32,

    pub nozzle_diameter: f32,
    pub filament_diameter: f32,
    pub model_extruder: u32,

    pub shells: u32,
    /// Window size used when looking for top and bottom skins, zero disables
    /// lids entirely.
    pub lids: u32,
    pub lid_pattern: LidPattern,
    /// Infill density in percent.
    pub infill_density: f32,

    pub skirt: bool,
    pub skirt_distance: f32,
    pub skirt_loops: u32,
    pub prime_line: bool,

    pub support: SupportConfig,
    pub gcode: GcodeConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SupportConfig {
    pub enabled: bool,
    /// Overhang angle in degrees. Faces tilted further than this from the
    /// vertical get support.
    pub angle: f32,
    /// Support density in percent.
    pub density: f32,
    /// Gap between the top of a support column and the overhang, in layers.
    pub top_gap: u32,
    /// Gap between the model and a support column standing on it, in layers.
    pub bottom_gap: u32,
    /// Horizontal clearance between support and model walls in mm.
    pub side_gap: f32,
    pub icicle_radius: f32,
    pub extruder: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GcodeConfig {
    pub extruder_temperature: u32,
    pub bed_temperature: u32,
    pub fans: u32,

    /// Feedrates are in mm/min.
    pub print_feedrate: f32,
    pub rapid_feedrate: f32,
    pub retract_feedrate: f32,
    pub retract_distance: f32,

    /// Layers that would print faster than this (in seconds) are slowed down.
    pub minimum_layer_time: f32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    #[default]
    Fdm,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LidPattern {
    #[default]
    Zigzag,
    Concentric,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupportPreset {
    None,
    Fast,
    Standard,
    Fine,
}

/// A single setting value as exposed by [`SliceConfig::setting`].
#[derive(Clone, Debug, PartialEq)]
pub enum SettingValue {
    Float(f32),
    Integer(u32),
    Bool(bool),
    Choice(String),
}

impl SliceConfig {
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("Failed to load slice config, using defaults: {err:#}");
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(if path.exists() {
            let file = fs::read(path)
                .with_context(|| format!("Can't read config `{}`", path.display()))?;
            let string = String::from_utf8_lossy(&file);
            let config = toml::from_str(&string)?;
            info!("Loaded slice config from `{}`", path.display());
            config
        } else {
            info!("No slice config at `{}`, using defaults", path.display());
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let string = toml::to_string(self)?;
        fs::write(path, string)?;
        Ok(())
    }

    /// Size of every layer mask in pixels.
    pub fn platform_resolution(&self) -> Vector2<u32> {
        self.platform_size
            .xy()
            .map(|x| (x * self.pixels_per_mm).ceil().max(1.0) as u32)
    }

    /// Height of the plane used to cut the mesh for the given layer.
    pub fn slice_z(&self, layer: usize) -> f32 {
        (layer as f32 + 0.5) * self.layer_height
    }

    /// Height of the nozzle while printing the given layer.
    pub fn print_z(&self, layer: usize) -> f32 {
        (layer as f32 + 1.0) * self.layer_height
    }

    pub fn filament_area(&self) -> f32 {
        let radius = self.filament_diameter / 2.0;
        std::f32::consts::PI * radius * radius
    }

    /// Cross section of one deposited bead.
    pub fn bead_area(&self) -> f32 {
        self.nozzle_diameter * self.layer_height
    }

    /// Millimeters of moved nozzle per millimeter of filament fed.
    pub fn extrusion_factor(&self) -> f32 {
        self.filament_area() / self.bead_area()
    }

    /// Distance between pattern strips that yields the given fill density.
    pub fn pattern_spacing(&self, density: f32) -> f32 {
        let width = self.nozzle_diameter;
        2.0 * width * (100.0 / density) - width
    }

    pub fn apply_support_preset(&mut self, preset: SupportPreset) {
        let support = &mut self.support;
        match preset {
            SupportPreset::None => support.enabled = false,
            SupportPreset::Fast => {
                (support.enabled, support.angle, support.density) = (true, 60.0, 20.0)
            }
            SupportPreset::Standard => {
                (support.enabled, support.angle, support.density) = (true, 50.0, 40.0)
            }
            SupportPreset::Fine => {
                (support.enabled, support.angle, support.density) = (true, 40.0, 60.0)
            }
        }
    }

    /// Looks up a setting by its stable name, for example `layer_height` or
    /// `support.top_gap`.
    pub fn setting(&self, name: &str) -> Option<SettingValue> {
        use SettingValue::*;
        let (support, gcode) = (&self.support, &self.gcode);

        Some(match name {
            "machine" => Choice(choice_name(&self.machine)),
            "pixels_per_mm" => Float(self.pixels_per_mm),
            "layer_height" => Float(self.layer_height),
            "nozzle_diameter" => Float(self.nozzle_diameter),
            "filament_diameter" => Float(self.filament_diameter),
            "model_extruder" => Integer(self.model_extruder),
            "shells" => Integer(self.shells),
            "lids" => Integer(self.lids),
            "lid_pattern" => Choice(choice_name(&self.lid_pattern)),
            "infill_density" => Float(self.infill_density),
            "skirt" => Bool(self.skirt),
            "skirt_distance" => Float(self.skirt_distance),
            "skirt_loops" => Integer(self.skirt_loops),
            "prime_line" => Bool(self.prime_line),
            "support.enabled" => Bool(support.enabled),
            "support.angle" => Float(support.angle),
            "support.density" => Float(support.density),
            "support.top_gap" => Integer(support.top_gap),
            "support.bottom_gap" => Integer(support.bottom_gap),
            "support.side_gap" => Float(support.side_gap),
            "support.icicle_radius" => Float(support.icicle_radius),
            "support.extruder" => Integer(support.extruder),
            "gcode.extruder_temperature" => Integer(gcode.extruder_temperature),
            "gcode.bed_temperature" => Integer(gcode.bed_temperature),
            "gcode.fans" => Integer(gcode.fans),
            "gcode.print_feedrate" => Float(gcode.print_feedrate),
            "gcode.rapid_feedrate" => Float(gcode.rapid_feedrate),
            "gcode.retract_feedrate" => Float(gcode.retract_feedrate),
            "gcode.retract_distance" => Float(gcode.retract_distance),
            "gcode.minimum_layer_time" => Float(gcode.minimum_layer_time),
            _ => return None,
        })
    }

    /// Parses `value` and stores it in the setting called `name`.
    pub fn set_setting(&mut self, name: &str, value: &str) -> Result<()> {
        fn parse<T: FromStr>(name: &str, value: &str) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value `{value}` for setting `{name}`"))
        }

        let (support, gcode) = (&mut self.support, &mut self.gcode);
        match name {
            "machine" => self.machine = parse_choice(name, value)?,
            "pixels_per_mm" => self.pixels_per_mm = parse(name, value)?,
            "layer_height" => self.layer_height = parse(name, value)?,
            "nozzle_diameter" => self.nozzle_diameter = parse(name, value)?,
            "filament_diameter" => self.filament_diameter = parse(name, value)?,
            "model_extruder" => self.model_extruder = parse(name, value)?,
            "shells" => self.shells = parse(name, value)?,
            "lids" => self.lids = parse(name, value)?,
            "lid_pattern" => self.lid_pattern = parse_choice(name, value)?,
            "infill_density" => self.infill_density = parse(name, value)?,
            "skirt" => self.skirt = parse(name, value)?,
            "skirt_distance" => self.skirt_distance = parse(name, value)?,
            "skirt_loops" => self.skirt_loops = parse(name, value)?,
            "prime_line" => self.prime_line = parse(name, value)?,
            "support.preset" => self.apply_support_preset(parse_choice(name, value)?),
            "support.enabled" => support.enabled = parse(name, value)?,
            "support.angle" => support.angle = parse(name, value)?,
            "support.density" => support.density = parse(name, value)?,
            "support.top_gap" => support.top_gap = parse(name, value)?,
            "support.bottom_gap" => support.bottom_gap = parse(name, value)?,
            "support.side_gap" => support.side_gap = parse(name, value)?,
            "support.icicle_radius" => support.icicle_radius = parse(name, value)?,
            "support.extruder" => support.extruder = parse(name, value)?,
            "gcode.extruder_temperature" => gcode.extruder_temperature = parse(name, value)?,
            "gcode.bed_temperature" => gcode.bed_temperature = parse(name, value)?,
            "gcode.fans" => gcode.fans = parse(name, value)?,
            "gcode.print_feedrate" => gcode.print_feedrate = parse(name, value)?,
            "gcode.rapid_feedrate" => gcode.rapid_feedrate = parse(name, value)?,
            "gcode.retract_feedrate" => gcode.retract_feedrate = parse(name, value)?,
            "gcode.retract_distance" => gcode.retract_distance = parse(name, value)?,
            "gcode.minimum_layer_time" => gcode.minimum_layer_time = parse(name, value)?,
            _ => bail!("Unknown setting `{name}`"),
        }

        Ok(())
    }
}

/// Serialized name of a choice, as it appears in config files.
fn choice_name<T: Serialize>(choice: &T) -> String {
    match toml::Value::try_from(choice) {
        Ok(toml::Value::String(name)) => name,
        _ => String::new(),
    }
}

/// Reads a choice by its serialized name, ignoring case.
fn parse_choice<T: DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    toml::Value::String(value.trim().to_ascii_lowercase())
        .try_into()
        .with_context(|| format!("Invalid choice `{value}` for setting `{name}`"))
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            machine: MachineKind::Fdm,

            platform_size: Vector3::new(214.0, 214.0, 230.0),
            pixels_per_mm: 10.0,
            layer_height: 0.3,

            nozzle_diameter: 0.4,
            filament_diameter: 1.75,
            model_extruder: 0,

            shells: 3,
            lids: 2,
            lid_pattern: LidPattern::Zigzag,
            infill_density: 20.0,

            skirt: true,
            skirt_distance: 3.0,
            skirt_loops: 2,
            prime_line: false,

            support: SupportConfig::default(),
            gcode: GcodeConfig::default(),
        }
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            angle: 50.0,
            density: 40.0,
            top_gap: 1,
            bottom_gap: 1,
            side_gap: 0.2,
            icicle_radius: 1.0,
            extruder: 0,
        }
    }
}

impl Default for GcodeConfig {
    fn default() -> Self {
        Self {
            extruder_temperature: 200,
            bed_temperature: 60,
            fans: 3,

            print_feedrate: 1800.0,
            rapid_feedrate: 3600.0,
            retract_feedrate: 1800.0,
            retract_distance: 1.0,

            minimum_layer_time: 15.0,
        }
    }
}
