//! Stratigraphy tool: classifies a DEM + land cover (+ glacier outlines,
//! + geology) into the CryoGrid stratigraphy classes and writes the
//! classified raster as JSON, optionally with class polygons as GeoJSON.
//!
//! All inputs must already be on one grid; the only regridding offered is
//! nearest-neighbour resampling of the land cover onto the DEM grid.
mod geotiff;
mod raster_io;
mod vector;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use serde::Deserialize;
use strat_core::stratigraphy::{build_context, default_rules, StratigraphyInputs, StratigraphyParams};
use strat_core::{GridSpec, RuleSet, SpatialIndexBuilder, StratigraphyEngine};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "stratify",
    about = "Classify DEM, land cover and glacier outlines into CryoGrid stratigraphy classes"
)]
struct Args {
    /// Run configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the output path of the classified raster
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the bedrock / bare soil slope threshold (degrees)
    #[arg(long)]
    slope_threshold: Option<f64>,

    /// Skip DEM smoothing before slope derivation
    #[arg(long)]
    no_smooth: bool,

    /// Print raw rule-mask coverage as JSON and exit without classifying
    #[arg(long)]
    inspect: bool,
}

// ── Run configuration ────────────────────────────────────────────────────────

fn default_max_classes() -> usize {
    strat_core::vectorize::DEFAULT_MAX_CLASSES
}

/// Paths are relative to the directory of the configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunConfig {
    dem: PathBuf,
    land_cover: PathBuf,
    #[serde(default)]
    glaciers: Option<PathBuf>,
    #[serde(default)]
    geology: Option<PathBuf>,
    /// Rule set (JSON) replacing the default six classes.
    #[serde(default)]
    rules: Option<PathBuf>,
    #[serde(default)]
    params: StratigraphyParams,
    /// Nearest-neighbour resample the land cover onto the DEM grid.
    #[serde(default)]
    resample_land_cover: bool,
    output: PathBuf,
    /// Class polygons (GeoJSON); omitted → not vectorized.
    #[serde(default)]
    polygons: Option<PathBuf>,
    #[serde(default = "default_max_classes")]
    max_classes: usize,
}

impl RunConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        let mut config: RunConfig =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        config.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.dem);
        join(&mut self.land_cover);
        join(&mut self.output);
        for p in [&mut self.glaciers, &mut self.geology, &mut self.rules, &mut self.polygons]
            .into_iter()
            .flatten()
        {
            join(p);
        }
    }

    fn apply(&mut self, args: &Args) {
        if let Some(output) = &args.output {
            self.output = output.clone();
        }
        if let Some(threshold) = args.slope_threshold {
            self.params.slope_threshold = threshold;
        }
        if args.no_smooth {
            self.params.smooth_dem = false;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn load_inputs(config: &RunConfig) -> Result<StratigraphyInputs> {
    let dem = raster_io::read_dem(&config.dem)?;
    let grid = GridSpec::from_reference(&dem).context("DEM cannot define the run grid")?;
    info!(
        "grid {} {}×{} at {:?}",
        grid.crs(),
        grid.rows(),
        grid.cols(),
        grid.resolution()
    );

    let mut land_cover = raster_io::read_categorical(&config.land_cover)?;
    if config.resample_land_cover && !grid.matches(&land_cover) {
        info!("resampling land cover onto the DEM grid");
        let fill = land_cover.nodata.unwrap_or(0);
        land_cover = land_cover.resample_to(&grid, fill)?.with_nodata(fill);
    }

    let glaciers = match &config.glaciers {
        Some(path) => Some(vector::read_layer(path, grid.crs())?),
        None => None,
    };
    let geology = match &config.geology {
        Some(path) => Some(vector::read_layer(path, grid.crs())?),
        None => None,
    };

    Ok(StratigraphyInputs {
        dem,
        land_cover,
        glaciers,
        geology,
    })
}

fn load_rules(config: &RunConfig) -> Result<RuleSet> {
    match &config.rules {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid rule set in {}", path.display()))
        }
        None => Ok(default_rules(&config.params)?),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RunConfig::load(&args.config)?;
    config.apply(&args);

    let inputs = load_inputs(&config)?;
    let rules = load_rules(&config)?;
    let ctx = build_context(&inputs, &config.params).context("Failed to prepare layers")?;
    let engine = StratigraphyEngine::new(ctx.grid().clone(), rules).with_attributes(config.params.attributes());

    if args.inspect {
        let report = engine.inspect(&ctx)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let classified = engine.classify(&ctx).context("Stratigraphy classification failed")?;
    let counts = classified.class_counts();
    for (entry, label) in classified.legend().entries().iter().zip(classified.legend().labels()) {
        info!("{label}: {} px", counts.get(&entry.code).copied().unwrap_or(0));
    }

    if let Some(parent) = config.output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config.output, serde_json::to_string(&classified)?)
        .with_context(|| format!("Write failed: {}", config.output.display()))?;
    info!("wrote {}", config.output.display());

    if let Some(path) = &config.polygons {
        let features = SpatialIndexBuilder::new()
            .max_classes(config.max_classes)
            .raster_to_vector(&classified)
            .context("Vectorization failed")?;
        vector::write_classes(path, &features, classified.grid().crs())?;
        info!("wrote {} class polygon feature(s) to {}", features.len(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_relative_paths() {
        let mut config: RunConfig = serde_json::from_str(
            r#"{"dem": "dem.tif", "land_cover": "/data/lc.tif", "glaciers": "rgi.geojson",
                "params": {"slope_threshold": 35}, "output": "out/strat.json"}"#,
        )
        .unwrap();
        config.resolve_paths(Path::new("/runs/karakoram"));
        assert_eq!(config.dem, PathBuf::from("/runs/karakoram/dem.tif"));
        assert_eq!(config.land_cover, PathBuf::from("/data/lc.tif"));
        assert_eq!(config.glaciers, Some(PathBuf::from("/runs/karakoram/rgi.geojson")));
        assert_eq!(config.geology, None);
        assert_eq!(config.params.slope_threshold, 35.0);
        assert!(config.params.smooth_dem);
        assert_eq!(config.max_classes, 20);
        assert!(!config.resample_land_cover);
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let r = serde_json::from_str::<RunConfig>(
            r#"{"dem": "a.tif", "land_cover": "b.tif", "output": "c.json", "slope": 30}"#,
        );
        assert!(r.is_err());
    }

    #[test]
    fn flags_override_config() {
        let mut config: RunConfig =
            serde_json::from_str(r#"{"dem": "a.tif", "land_cover": "b.tif", "output": "c.json"}"#).unwrap();
        let args = Args::parse_from(["stratify", "-c", "run.json", "--slope-threshold", "25", "--no-smooth"]);
        config.apply(&args);
        assert_eq!(config.params.slope_threshold, 25.0);
        assert!(!config.params.smooth_dem);
        assert_eq!(config.output, PathBuf::from("c.json"));
    }
}
