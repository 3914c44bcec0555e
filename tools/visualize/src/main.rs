//! Renders a classified stratigraphy raster (JSON written by `stratify`) to a
//! PNG in legend colours and prints the legend with per-class pixel counts.

use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use strat_core::ClassifiedRaster;

/// Drawn for codes the legend does not know. Unreachable for validated input.
const UNKNOWN: [u8; 3] = [255, 0, 255];

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render a classified stratigraphy raster to PNG")]
struct Args {
    /// Classified raster JSON
    input: PathBuf,

    /// Output PNG (defaults to the input path with a .png extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pixels per raster cell
    #[arg(long, default_value = "1")]
    scale: u32,
}

// ── Rendering ─────────────────────────────────────────────────────────────────

fn render(raster: &ClassifiedRaster, scale: u32) -> image::RgbImage {
    let (rows, cols) = raster.shape();
    let colors: Vec<(i32, [u8; 3])> = raster
        .legend()
        .entries()
        .iter()
        .map(|e| (e.code, e.color.to_array()))
        .collect();
    image::RgbImage::from_fn(cols as u32 * scale, rows as u32 * scale, |x, y| {
        let code = raster.get((y / scale) as usize, (x / scale) as usize);
        let rgb = colors
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(UNKNOWN, |&(_, rgb)| rgb);
        image::Rgb(rgb)
    })
}

/// Legend labels (`" 3 = Bed-rock: slope > 30°"`) with pixel counts and shares.
fn legend_lines(raster: &ClassifiedRaster) -> Vec<String> {
    let counts = raster.class_counts();
    let total = raster.codes().len().max(1) as f64;
    raster
        .legend()
        .entries()
        .iter()
        .zip(raster.legend().labels())
        .map(|(entry, label)| {
            let n = counts.get(&entry.code).copied().unwrap_or(0);
            format!("{label:<40} {} {n:>10} px {:>6.2}%", entry.color, 100.0 * n as f64 / total)
        })
        .collect()
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    ensure!(args.scale > 0, "--scale must be at least 1");

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
    let raster: ClassifiedRaster = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid classified raster", args.input.display()))?;

    let attrs = raster.attributes();
    if !attrs.long_name.is_empty() {
        println!("{}", attrs.long_name);
    }
    if !attrs.description.is_empty() {
        println!("{}", attrs.description);
    }
    for line in legend_lines(&raster) {
        println!("{line}");
    }

    let out = args.output.unwrap_or_else(|| args.input.with_extension("png"));
    render(&raster, args.scale)
        .save(&out)
        .with_context(|| format!("Failed to save {}", out.display()))?;
    println!("Wrote {}", out.display());
    Ok(())
}
