use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use clap::Parser;
use common::config::SliceConfig;
use nalgebra::{ArrayStorage, Const, Matrix, Scalar, Vector3, U1};
use num_traits::Zero;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Parser)]
/// Slices a mesh into G-code for filament printers.
pub struct Args {
    /// Path to a .stl or .obj file.
    pub mesh: PathBuf,

    /// File to save the G-code to.
    pub output: PathBuf,

    #[arg(long)]
    /// TOML slice config to start from. Defaults are used if missing.
    pub config: Option<PathBuf>,

    #[arg(long = "set", value_parser = setting_value_parser)]
    /// Overrides a single setting, for example `--set support.top_gap=2`.
    pub overrides: Vec<(String, String)>,

    #[arg(long, default_value = "1, 1, 1", value_parser = vector_value_parser::<f32, 3>)]
    /// Scale of the model along the X, Y, and Z axes.
    pub scale: Vector3<f32>,

    #[arg(long, default_value = "0, 0, 0", value_parser = vector_value_parser::<f32, 3>)]
    /// Rotation of the model in degrees, pitch, roll, yaw.
    pub rotation: Vector3<f32>,

    #[arg(long, default_value = "0, 0", value_parser = vector_value_parser::<f32, 2>)]
    /// Offset of the model center from the center of the build plate.
    pub position: nalgebra::Vector2<f32>,

    #[arg(long)]
    /// Slice all layers at once on every core.
    pub parallel: bool,

    #[arg(long)]
    /// Writes an SVG preview of a layer. Needs --svg-layer.
    pub svg: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    /// Layer to draw in the SVG preview.
    pub svg_layer: usize,

    #[arg(long, default_value = "info")]
    /// Log level for the slicer crates.
    pub log_level: LevelFilter,
}

impl Args {
    pub fn slice_config(&self) -> Result<SliceConfig> {
        let mut config = match &self.config {
            Some(path) => SliceConfig::load(path)?,
            None => SliceConfig::default(),
        };

        for (name, value) in &self.overrides {
            config.set_setting(name, value)?;
        }

        Ok(config)
    }
}

fn setting_value_parser(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .context("Settings must be given as `name=value`")?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

fn vector_value_parser<T, const N: usize>(
    raw: &str,
) -> Result<Matrix<T, Const<N>, U1, ArrayStorage<T, N, 1>>>
where
    T: FromStr + Scalar + Zero,
    T::Err: Send + Sync + std::error::Error + 'static,
{
    let mut vec = Matrix::<T, Const<N>, U1, ArrayStorage<T, N, 1>>::zeros();

    let mut parts = raw.splitn(N, ',');
    for i in 0..N {
        let element = parts.next().context("Missing vector element")?.trim();
        vec[i] = element
            .parse()
            .context("Can't convert element from string")?;
    }

    Ok(vec)
}
