use std::{
    fs::File,
    io::{stdout, BufReader, Write},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use common::progress::{LayerProgress, Progress};
use gcode_format::GcodeFile;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use args::Args;
use slicer::{
    format::svg::SvgPreview,
    mesh::load_mesh,
    slicer::{SliceStatus, Slicer},
};

mod args;

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = filter::Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target("slicer", args.log_level)
        .with_target("gcode_format", args.log_level)
        .with_target("common", args.log_level);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.slice_config()?;

    let ext = (args.mesh.extension())
        .context("Mesh file has no extension")?
        .to_string_lossy();
    let file = File::open(&args.mesh)
        .with_context(|| format!("Can't open `{}`", args.mesh.display()))?;
    let mut mesh = load_mesh(BufReader::new(file), &ext)?;

    let closed = mesh.fix_holes();
    if closed > 0 {
        info!("Closed {closed} holes");
    }
    if !mesh.is_manifold() {
        warn!("Mesh is not watertight, some layers may have broken outlines");
    }

    mesh.set_scale(args.scale);
    mesh.set_rotation(args.rotation.map(f32::to_radians));
    let center = config.platform_size.xy() / 2.0 + args.position;
    mesh.place_on_plate(center);

    println!(
        "Loaded `{}`. {{ vert: {}, face: {} }}",
        args.mesh.display(),
        mesh.vertex_count(),
        mesh.face_count()
    );

    let (min, max) = mesh.bounds();
    let size = config.platform_size;
    if min.x < 0.0 || min.y < 0.0 || max.x > size.x || max.y > size.y || max.z > size.z {
        warn!("Model extends outside of the print volume and will be cut off");
    }

    let now = Instant::now();
    let mut slicer = Slicer::new(config.clone(), mesh);
    let status = if args.parallel {
        let progress = Progress::new();
        thread::scope(|s| {
            let worker = s.spawn(|| {
                let status = slicer.slice_parallel(&progress);
                progress.set_finished();
                status
            });

            while !worker.is_finished() {
                print!(
                    "\rLayer: {}/{}, {:.1}%",
                    progress.completed(),
                    progress.total(),
                    progress.progress() * 100.0
                );
                let _ = stdout().flush();
                thread::sleep(Duration::from_millis(100));
            }

            worker.join().unwrap_or(SliceStatus::Cancelled { layers: 0 })
        })
    } else {
        slicer.slice(&mut |progress: LayerProgress| {
            print!(
                "\rLayer: {}/{}, {:.1}%",
                progress.layer + 1,
                progress.total,
                progress.percent
            );
            let _ = stdout().flush();
            false
        })
    };
    println!();

    if let SliceStatus::Cancelled { layers } = status {
        warn!("Slicing stopped after {layers} layers");
    }

    let job = slicer.toolpath();
    let stats = GcodeFile::new(&job, &config)
        .with_generator(concat!("slicer ", env!("CARGO_PKG_VERSION")))
        .save(&args.output)?;

    if let Some(path) = &args.svg {
        let z = config.print_z(args.svg_layer);
        match job.find_layer(z) {
            Some(layer) => SvgPreview::new(layer, size.xy(), config.nozzle_diameter).save(path)?,
            None => warn!("Layer {} has nothing to preview", args.svg_layer),
        }
    }

    println!(
        "Done. {} layers, {:.1}m of filament. Elapsed: {:.1}s",
        stats.layers,
        stats.filament / 1000.0,
        now.elapsed().as_secs_f32()
    );

    Ok(())
}
