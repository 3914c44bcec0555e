//! CryoGrid stratigraphy: the default six-class rule set and the run that
//! turns a DEM, land cover and glacier outlines into a classified raster.
//!
//! Classes, in priority order:
//!
//! | code | name          | pixels                                         |
//! |------|---------------|------------------------------------------------|
//! | 1    | `excluded`    | trees, crops, built-up, water, wetland         |
//! | 2    | `glaciers`    | inside glacier outlines                        |
//! | 3    | `bedrock`     | bare ground steeper than the slope threshold   |
//! | 4    | `bare_soil`   | bare ground at or below the threshold          |
//! | 5    | `vegetation`  | shrubland, grassland                           |
//! | 6    | `lichen_moss` | moss and lichen                                |
use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::classified::{ClassifiedRaster, RasterAttributes};
use crate::engine::{MaskReport, StratigraphyEngine};
use crate::error::Result;
use crate::geology::{rasterize_geology, GEOLOGY_KEY_COLUMN};
use crate::grid::GridSpec;
use crate::landcover::{self, BARE_GROUND, EXCLUDED, LICHEN_MOSS, VEGETATED};
use crate::layer::{Comparison, LayerContext, LayerSource, VectorLayer};
use crate::mask::RasterMask;
use crate::raster::Raster;
use crate::rule::{ClassificationRule, MaskExpr, ParamValue, RuleSet};
use crate::terrain::{slope_degrees, smooth_dem};

// ── Layer names ─────────────────────────────────────────────────────────────

/// Conditioned (optionally smoothed) elevation, metres.
pub const ELEVATION: &str = "elevation";
/// Slope in degrees derived from [`ELEVATION`].
pub const SLOPE: &str = "slope";
/// ESA WorldCover codes.
pub const LAND_COVER: &str = "land_cover";
/// Rasterized glacier outlines.
pub const GLACIERS: &str = "glaciers";
/// Rock-type codes from the geology map; only present when geology is given.
pub const ROCK_TYPE: &str = "rock_type";

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratigraphyParams {
    /// Degrees. Bare ground steeper than this is bedrock.
    pub slope_threshold: f64,
    /// Median + mean 3×3 smoothing of the DEM before slope.
    pub smooth_dem: bool,
    /// Text between class name and detail in legend descriptions.
    pub label_separator: String,
    /// Glacier patches and gaps smaller than this many pixels are cleaned
    /// from the glacier mask. 0 disables the cleanup.
    pub min_glacier_pixels: usize,
}

impl Default for StratigraphyParams {
    fn default() -> Self {
        Self {
            slope_threshold: 30.0,
            smooth_dem: true,
            label_separator: ": ".to_string(),
            min_glacier_pixels: 0,
        }
    }
}

impl StratigraphyParams {
    /// Placeholders available to description templates.
    pub fn template_params(&self) -> BTreeMap<String, ParamValue> {
        BTreeMap::from([
            ("slope_threshold".to_string(), ParamValue::from(self.slope_threshold)),
            ("space".to_string(), ParamValue::from(self.label_separator.as_str())),
        ])
    }

    pub fn attributes(&self) -> RasterAttributes {
        RasterAttributes {
            long_name: "Estimated stratigraphy".to_string(),
            description: format!(
                "Stratigraphy estimated from land cover, slope, and glacier mask. \
                 Bare rock and soil are distinguished by slope threshold of {} degrees.",
                self.slope_threshold
            ),
        }
    }
}

/// Layers of one run. Land cover must lie on the DEM grid; vector layers
/// must be in the DEM CRS.
#[derive(Debug, Clone)]
pub struct StratigraphyInputs {
    pub dem: Raster<f32>,
    pub land_cover: Raster<i32>,
    pub glaciers: Option<VectorLayer>,
    pub geology: Option<VectorLayer>,
}

// ── Rules ───────────────────────────────────────────────────────────────────

fn land_cover(codes: &[i32]) -> MaskExpr {
    LayerSource::categorical(LAND_COVER, codes.to_vec()).into()
}

fn slope(comparison: Comparison) -> MaskExpr {
    LayerSource::continuous(SLOPE, comparison).into()
}

/// The six CryoGrid classes over the layers registered by [`build_context`].
pub fn default_rules(params: &StratigraphyParams) -> Result<RuleSet> {
    let threshold = params.slope_threshold as f32;
    RuleSet::new(vec![
        ClassificationRule::builder("excluded", 1)
            .description("Excluded{space}crops, built-up, water, forests")
            .color("#FA0000")
            .mask(land_cover(EXCLUDED))
            .build()?,
        ClassificationRule::builder("glaciers", 2)
            .description("Glacier{space}RGI mask")
            .color("#fcfcfc")
            .mask(LayerSource::mask(GLACIERS))
            .build()?,
        ClassificationRule::builder("bedrock", 3)
            .description("Bed-rock{space}slope > {slope_threshold}°")
            .color("#485b73")
            .mask(land_cover(BARE_GROUND) & slope(Comparison::Gt(threshold)))
            .build()?,
        ClassificationRule::builder("bare_soil", 4)
            .description("Bare soil{space}slope ≤ {slope_threshold}°")
            .color("#c4b18b")
            .mask(land_cover(BARE_GROUND) & slope(Comparison::Le(threshold)))
            .build()?,
        ClassificationRule::builder("vegetation", 5)
            .description("Vegetated{space}thicker soils")
            .color("#FFFF4C")
            .mask(land_cover(VEGETATED))
            .build()?,
        ClassificationRule::builder("lichen_moss", 6)
            .description("Lichen and moss{space}rocky/thin soil")
            .color("#469ec7")
            .mask(land_cover(LICHEN_MOSS))
            .build()?,
    ])
}

// ── Run ─────────────────────────────────────────────────────────────────────

/// Derive the grid from the DEM and register every layer the default rules
/// (and custom rules) can refer to.
pub fn build_context(inputs: &StratigraphyInputs, params: &StratigraphyParams) -> Result<LayerContext> {
    let grid = GridSpec::from_reference(&inputs.dem)?;
    let mut ctx = LayerContext::new(grid.clone());

    let dem = if params.smooth_dem {
        smooth_dem(&inputs.dem)
    } else {
        inputs.dem.nodata_to_nan()
    };
    debug!("elevation {:.1}..{:.1} m", dem.min_value(), dem.max_value());
    let slope = slope_degrees(&dem)?;
    ctx.insert_continuous(ELEVATION, dem)?;
    ctx.insert_continuous(SLOPE, slope)?;

    let unknown = landcover::unknown_codes(&inputs.land_cover);
    if !unknown.is_empty() {
        warn!("land cover holds values outside WorldCover: {unknown:?}");
    }
    ctx.insert_categorical(LAND_COVER, inputs.land_cover.clone())?;

    ctx.insert_mask(GLACIERS, glacier_mask(inputs.glaciers.as_ref(), &grid, params)?)?;

    if let Some(geology) = &inputs.geology {
        let rock = rasterize_geology(geology, GEOLOGY_KEY_COLUMN, &grid)?;
        ctx.insert_categorical(ROCK_TYPE, rock)?;
    }

    for (name, value) in params.template_params() {
        ctx.set_param(name, value);
    }
    Ok(ctx)
}

fn glacier_mask(
    glaciers: Option<&VectorLayer>,
    grid: &GridSpec,
    params: &StratigraphyParams,
) -> Result<RasterMask> {
    let Some(layer) = glaciers else {
        info!("no glacier outlines given, glacier class stays empty");
        return Ok(RasterMask::empty(grid));
    };
    let clipped = layer.clip_to_grid(grid)?;
    info!("rasterizing {} of {} glacier outlines", clipped.len(), layer.len());
    let mask = clipped.rasterize(grid, None)?;
    if params.min_glacier_pixels > 0 {
        Ok(mask.remove_small_objects(params.min_glacier_pixels))
    } else {
        Ok(mask)
    }
}

/// Classify with [`default_rules`].
pub fn make_stratigraphy(inputs: &StratigraphyInputs, params: &StratigraphyParams) -> Result<ClassifiedRaster> {
    make_stratigraphy_with(inputs, params, default_rules(params)?)
}

/// Classify with a caller-supplied rule set over the same layers.
pub fn make_stratigraphy_with(
    inputs: &StratigraphyInputs,
    params: &StratigraphyParams,
    rules: RuleSet,
) -> Result<ClassifiedRaster> {
    let ctx = build_context(inputs, params)?;
    let engine = StratigraphyEngine::new(ctx.grid().clone(), rules).with_attributes(params.attributes());
    let classified = engine.classify(&ctx)?;
    info!(
        "stratigraphy done: {} classes present",
        classified.classes_present().len()
    );
    Ok(classified)
}

/// Raw-mask diagnostics of the default rules without classifying.
pub fn inspect_stratigraphy(inputs: &StratigraphyInputs, params: &StratigraphyParams) -> Result<MaskReport> {
    let ctx = build_context(inputs, params)?;
    StratigraphyEngine::new(ctx.grid().clone(), default_rules(params)?).inspect(&ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StratError;
    use crate::geology::RockType;
    use crate::grid::{Crs, GeoTransform};
    use crate::layer::VectorFeature;
    use assert_matches::assert_matches;
    use geo_types::{polygon, MultiPolygon, Polygon};

    fn grid() -> GridSpec {
        GridSpec::new(Crs::epsg(32643), GeoTransform::new(0.0, 20.0, 10.0, 10.0), 2, 3).unwrap()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        let p: Polygon<f64> = polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)];
        MultiPolygon(vec![p])
    }

    /// Elevation rising 20 m per 10 m column: every pixel is steeper than 30°.
    fn ramp() -> Raster<f32> {
        Raster::from_grid_data(&grid(), vec![0.0, 20.0, 40.0, 0.0, 20.0, 40.0]).unwrap()
    }

    fn flat() -> Raster<f32> {
        Raster::on_grid(&grid(), 100.0)
    }

    fn inputs(dem: Raster<f32>, glaciers: Option<VectorLayer>) -> StratigraphyInputs {
        StratigraphyInputs {
            dem,
            land_cover: Raster::from_grid_data(&grid(), vec![10, 60, 20, 100, 70, 30]).unwrap(),
            glaciers,
            geology: None,
        }
    }

    fn one_glacier() -> VectorLayer {
        VectorLayer::from_geometries(Crs::epsg(32643), [square(12.0, 12.0, 18.0, 18.0)])
    }

    fn unsmoothed() -> StratigraphyParams {
        StratigraphyParams {
            smooth_dem: false,
            ..Default::default()
        }
    }

    #[test]
    fn default_rules_follow_class_table() {
        let rules = default_rules(&StratigraphyParams::default()).unwrap();
        assert_eq!(rules.codes(), vec![1, 2, 3, 4, 5, 6]);
        let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            ["excluded", "glaciers", "bedrock", "bare_soil", "vegetation", "lichen_moss"]
        );
    }

    #[test]
    fn legend_renders_threshold_and_separator() {
        let params = StratigraphyParams {
            slope_threshold: 25.0,
            ..Default::default()
        };
        let legend = default_rules(&params).unwrap().legend(&params.template_params()).unwrap();
        assert_eq!(legend.get(3).unwrap().description, "Bed-rock: slope > 25°");
        assert_eq!(legend.labels()[3], " 4 = Bare soil: slope ≤ 25°");
        assert_eq!(legend.get(1).unwrap().color.to_hex(), "#fa0000");
    }

    #[test]
    fn steep_bare_ground_is_bedrock() {
        let out = make_stratigraphy(&inputs(ramp(), Some(one_glacier())), &unsmoothed()).unwrap();
        assert_eq!(out.codes(), &[1, 2, 5, 6, 3, 5]);
        assert_eq!(out.attributes().long_name, "Estimated stratigraphy");
        assert!(out.attributes().description.ends_with("slope threshold of 30 degrees."));
    }

    #[test]
    fn gentle_bare_ground_is_bare_soil() {
        let out = make_stratigraphy(&inputs(flat(), None), &StratigraphyParams::default()).unwrap();
        assert_eq!(out.codes(), &[1, 4, 5, 6, 4, 5]);
        assert_eq!(out.classes_present(), vec![1, 4, 5, 6]);
        assert_eq!(out.legend().len(), 6);
    }

    #[test]
    fn land_cover_nodata_leaves_pixels_unclassified() {
        let mut run = inputs(flat(), None);
        run.land_cover = Raster::from_grid_data(&grid(), vec![10, 0, 20, 100, 70, 30])
            .unwrap()
            .with_nodata(0);
        assert_matches!(
            make_stratigraphy(&run, &unsmoothed()),
            Err(StratError::IncompleteClassification { unclassified: 1, sample }) if sample == vec![(0, 1)]
        );
    }

    #[test]
    fn land_cover_off_the_dem_grid_is_rejected() {
        let mut run = inputs(flat(), None);
        let shifted = GridSpec::new(Crs::epsg(32643), GeoTransform::new(10.0, 20.0, 10.0, 10.0), 2, 3).unwrap();
        run.land_cover = Raster::on_grid(&shifted, 20);
        assert_matches!(
            make_stratigraphy(&run, &unsmoothed()),
            Err(StratError::GridMismatch { layer, .. }) if layer == LAND_COVER
        );
    }

    #[test]
    fn glacier_speckle_cleanup_reclaims_pixels() {
        let params = StratigraphyParams {
            min_glacier_pixels: 2,
            ..unsmoothed()
        };
        let out = make_stratigraphy(&inputs(ramp(), Some(one_glacier())), &params).unwrap();
        assert_eq!(out.get(0, 1), 3);
    }

    #[test]
    fn geology_adds_rock_type_layer() {
        let mut run = inputs(flat(), None);
        run.geology = Some(VectorLayer::new(
            Crs::epsg(32643),
            vec![VectorFeature::new(square(1.0, 1.0, 29.0, 19.0)).with_property(GEOLOGY_KEY_COLUMN, "Pt")],
        ));
        let ctx = build_context(&run, &unsmoothed()).unwrap();
        let rock = ctx.categorical(ROCK_TYPE).unwrap();
        assert!(rock.data.iter().all(|&c| c == RockType::Schist.code()));
        assert!(!build_context(&inputs(flat(), None), &unsmoothed()).unwrap().contains(ROCK_TYPE));
    }

    #[test]
    fn custom_rules_run_over_the_same_layers() {
        let rules = RuleSet::new(vec![
            ClassificationRule::builder("water_or_trees", 1)
                .description("Excluded")
                .color("#0064c8")
                .mask(land_cover(EXCLUDED))
                .build()
                .unwrap(),
            ClassificationRule::builder("rest", 9)
                .description("Everything else")
                .color("#999999")
                .mask(MaskExpr::Everywhere)
                .build()
                .unwrap(),
        ])
        .unwrap();
        let out = make_stratigraphy_with(&inputs(flat(), None), &unsmoothed(), rules).unwrap();
        assert_eq!(out.codes(), &[1, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn inspection_reports_raw_overlap() {
        let report = inspect_stratigraphy(&inputs(ramp(), Some(one_glacier())), &unsmoothed()).unwrap();
        assert_eq!(report.total_pixels, 6);
        // The glacier pixel is also steep bare ground.
        assert_eq!(report.overlapping_pixels, 1);
        assert_eq!(report.unclassified_pixels, 0);
    }

    #[test]
    fn params_fill_missing_fields_from_defaults() {
        let p: StratigraphyParams = serde_json::from_str(r#"{"slope_threshold": 25}"#).unwrap();
        assert_eq!(p.slope_threshold, 25.0);
        assert!(p.smooth_dem);
        assert_eq!(p.label_separator, ": ");
    }
}
