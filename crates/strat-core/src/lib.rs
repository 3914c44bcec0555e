//! Stratigraphy classification for CryoGrid model domains.
//!
//! Layers that already share one grid (DEM, land cover, glacier outlines,
//! geology) are turned into boolean masks by ordered [`ClassificationRule`]s;
//! the [`StratigraphyEngine`] merges them first-match-wins into a validated
//! [`ClassifiedRaster`]. [`stratigraphy`] holds the default CryoGrid classes.

pub mod classified;
pub mod engine;
pub mod error;
pub mod geology;
pub mod grid;
pub mod landcover;
pub mod layer;
pub mod legend;
pub mod mask;
pub mod raster;
pub mod rasterize;
pub mod rule;
pub mod stratigraphy;
pub mod terrain;
pub mod vectorize;

pub use classified::{ClassifiedRaster, RasterAttributes};
pub use engine::{MaskReport, RuleCoverage, StratigraphyEngine};
pub use error::{Result, StratError};
pub use grid::{Bounds, Crs, GeoTransform, GridSpec};
pub use layer::{AttributeFilter, Comparison, Layer, LayerContext, LayerSource, VectorFeature, VectorLayer};
pub use legend::{Color, Legend, LegendEntry};
pub use mask::RasterMask;
pub use raster::Raster;
pub use rule::{ClassCode, ClassificationRule, MaskExpr, ParamValue, RuleSet};
pub use stratigraphy::{make_stratigraphy, StratigraphyInputs, StratigraphyParams};
pub use vectorize::{ClassFeature, SpatialIndexBuilder};
