use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gcode_format::GcodeSummary;

#[derive(Parser)]
struct Args {
    /// Path to the .gcode file
    input_file: PathBuf,

    /// Print a line for every layer
    #[clap(short, long)]
    layers: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.input_file)
        .with_context(|| format!("Can't read `{}`", args.input_file.display()))?;
    let summary = GcodeSummary::parse(&raw);

    println!("Layers: {}", summary.layers.len());
    println!("Moves: {}", summary.total_moves());
    println!("Tool selects: {}", summary.tool_changes);
    if let Some(time) = &summary.estimated_time {
        println!("Estimated time: {time}");
    }

    if args.layers {
        for layer in &summary.layers {
            let extrusion = layer.print_extrusion.last().copied().unwrap_or_default();
            println!(
                "  z={:<8} rapids={:<5} prints={:<6} e={extrusion:.3}",
                layer.z,
                layer.rapids,
                layer.print_extrusion.len()
            );
        }
    }

    Ok(())
}
