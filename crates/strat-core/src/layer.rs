//! Input layers and the sources that turn them into masks.
//!
//! A [`LayerContext`] holds every layer of one run under a name, all on the
//! run grid. A [`LayerSource`] names one of those layers plus the predicate
//! that selects pixels from it; rules are built from sources.
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use geo::Intersects;
use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StratError};
use crate::grid::{Crs, GridSpec};
use crate::mask::RasterMask;
use crate::raster::Raster;
use crate::rasterize::rasterize_mask;
use crate::rule::ParamValue;

// ── Vector layers ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFeature {
    pub geometry: MultiPolygon<f64>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl VectorFeature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Polygon features in one CRS (glacier outlines, geology units, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    pub crs: Crs,
    pub features: Vec<VectorFeature>,
}

/// Keep only features whose `column` property is one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub column: String,
    pub values: Vec<String>,
}

impl AttributeFilter {
    pub fn new(column: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, feature: &VectorFeature) -> bool {
        feature
            .property(&self.column)
            .is_some_and(|v| self.values.iter().any(|x| x == v))
    }
}

impl VectorLayer {
    pub fn new(crs: Crs, features: Vec<VectorFeature>) -> Self {
        Self { crs, features }
    }

    /// Layer of attribute-less features.
    pub fn from_geometries(crs: Crs, geometries: impl IntoIterator<Item = MultiPolygon<f64>>) -> Self {
        Self::new(crs, geometries.into_iter().map(VectorFeature::new).collect())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Drop features that do not touch the grid extent.
    pub fn clip_to_grid(&self, grid: &GridSpec) -> Result<VectorLayer> {
        self.ensure_crs(grid)?;
        let extent = grid.bounds().to_rect().to_polygon();
        let features = self
            .features
            .iter()
            .filter(|f| f.geometry.intersects(&extent))
            .cloned()
            .collect();
        Ok(Self::new(self.crs.clone(), features))
    }

    /// Geometries passing `filter` (all geometries when `None`).
    pub fn geometries(&self, filter: Option<&AttributeFilter>) -> Vec<MultiPolygon<f64>> {
        self.features
            .iter()
            .filter(|f| filter.map_or(true, |flt| flt.accepts(f)))
            .map(|f| f.geometry.clone())
            .collect()
    }

    /// All-touched rasterization of the (filtered) features onto `grid`.
    pub fn rasterize(&self, grid: &GridSpec, filter: Option<&AttributeFilter>) -> Result<RasterMask> {
        self.ensure_crs(grid)?;
        Ok(rasterize_mask(&self.geometries(filter), grid))
    }

    pub(crate) fn ensure_crs(&self, grid: &GridSpec) -> Result<()> {
        if &self.crs != grid.crs() {
            return Err(StratError::grid(
                "vector layer",
                format!("CRS {} differs from grid CRS {}", self.crs, grid.crs()),
            ));
        }
        Ok(())
    }
}

// ── Layers ──────────────────────────────────────────────────────────────────

/// A named input registered in a [`LayerContext`].
#[derive(Debug, Clone)]
pub enum Layer {
    Vector(VectorLayer),
    Categorical(Raster<i32>),
    Continuous(Raster<f32>),
    Mask(RasterMask),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Vector(_) => "vector",
            Layer::Categorical(_) => "categorical",
            Layer::Continuous(_) => "continuous",
            Layer::Mask(_) => "mask",
        }
    }
}

/// Layers, grid and template parameters of one classification run.
#[derive(Debug, Clone)]
pub struct LayerContext {
    grid: GridSpec,
    layers: HashMap<String, Layer>,
    params: BTreeMap<String, ParamValue>,
}

impl LayerContext {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            layers: HashMap::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.insert(name.into(), value.into());
    }

    /// Registers a vector layer. Its CRS must be the grid CRS.
    pub fn insert_vector(&mut self, name: impl Into<String>, layer: VectorLayer) -> Result<()> {
        let name = name.into();
        if &layer.crs != self.grid.crs() {
            return Err(StratError::grid(
                name,
                format!("CRS {} differs from grid CRS {}", layer.crs, self.grid.crs()),
            ));
        }
        self.layers.insert(name, Layer::Vector(layer));
        Ok(())
    }

    pub fn insert_categorical(&mut self, name: impl Into<String>, raster: Raster<i32>) -> Result<()> {
        let name = name.into();
        self.grid.ensure_matches(&name, &raster)?;
        self.layers.insert(name, Layer::Categorical(raster));
        Ok(())
    }

    pub fn insert_continuous(&mut self, name: impl Into<String>, raster: Raster<f32>) -> Result<()> {
        let name = name.into();
        self.grid.ensure_matches(&name, &raster)?;
        self.layers.insert(name, Layer::Continuous(raster));
        Ok(())
    }

    pub fn insert_mask(&mut self, name: impl Into<String>, mask: RasterMask) -> Result<()> {
        let name = name.into();
        self.grid.ensure_same_grid(&name, mask.grid())?;
        self.layers.insert(name, Layer::Mask(mask));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    /// Sorted layer names.
    pub fn layer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.layers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Result<&Layer> {
        self.layers
            .get(name)
            .ok_or_else(|| StratError::MissingLayer(name.to_string()))
    }

    pub fn vector(&self, name: &str) -> Result<&VectorLayer> {
        match self.get(name)? {
            Layer::Vector(v) => Ok(v),
            other => Err(kind_error(name, "vector", other)),
        }
    }

    pub fn categorical(&self, name: &str) -> Result<&Raster<i32>> {
        match self.get(name)? {
            Layer::Categorical(r) => Ok(r),
            other => Err(kind_error(name, "categorical", other)),
        }
    }

    pub fn continuous(&self, name: &str) -> Result<&Raster<f32>> {
        match self.get(name)? {
            Layer::Continuous(r) => Ok(r),
            other => Err(kind_error(name, "continuous", other)),
        }
    }

    pub fn mask(&self, name: &str) -> Result<&RasterMask> {
        match self.get(name)? {
            Layer::Mask(m) => Ok(m),
            other => Err(kind_error(name, "mask", other)),
        }
    }
}

fn kind_error(name: &str, expected: &'static str, found: &Layer) -> StratError {
    StratError::LayerKind {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

// ── Sources ─────────────────────────────────────────────────────────────────

/// Threshold test for continuous layers. `Between` is half-open: `min ≤ v < max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt(f32),
    Ge(f32),
    Lt(f32),
    Le(f32),
    Between { min: f32, max: f32 },
}

impl Comparison {
    /// NaN never passes.
    pub fn test(&self, v: f32) -> bool {
        match *self {
            Comparison::Gt(t) => v > t,
            Comparison::Ge(t) => v >= t,
            Comparison::Lt(t) => v < t,
            Comparison::Le(t) => v <= t,
            Comparison::Between { min, max } => v >= min && v < max,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Gt(t) => write!(f, "> {t}"),
            Comparison::Ge(t) => write!(f, ">= {t}"),
            Comparison::Lt(t) => write!(f, "< {t}"),
            Comparison::Le(t) => write!(f, "<= {t}"),
            Comparison::Between { min, max } => write!(f, "in [{min}, {max})"),
        }
    }
}

/// Where a rule's pixels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSource {
    /// Polygons of a vector layer, optionally filtered on an attribute.
    Vector {
        layer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<AttributeFilter>,
    },
    /// Pixels of an integer raster whose value is in `codes`.
    Categorical { layer: String, codes: Vec<i32> },
    /// Pixels of a float raster passing `comparison`.
    Continuous { layer: String, comparison: Comparison },
    /// A precomputed mask, used as is.
    Mask { layer: String },
}

impl LayerSource {
    pub fn vector(layer: impl Into<String>) -> Self {
        Self::Vector {
            layer: layer.into(),
            filter: None,
        }
    }

    pub fn categorical(layer: impl Into<String>, codes: impl Into<Vec<i32>>) -> Self {
        Self::Categorical {
            layer: layer.into(),
            codes: codes.into(),
        }
    }

    pub fn continuous(layer: impl Into<String>, comparison: Comparison) -> Self {
        Self::Continuous {
            layer: layer.into(),
            comparison,
        }
    }

    pub fn mask(layer: impl Into<String>) -> Self {
        Self::Mask { layer: layer.into() }
    }

    pub fn layer_name(&self) -> &str {
        match self {
            Self::Vector { layer, .. }
            | Self::Categorical { layer, .. }
            | Self::Continuous { layer, .. }
            | Self::Mask { layer } => layer,
        }
    }

    /// Produce the mask on the context grid.
    pub fn to_mask(&self, ctx: &LayerContext) -> Result<RasterMask> {
        let grid = ctx.grid();
        match self {
            Self::Vector { layer, filter } => ctx.vector(layer)?.rasterize(grid, filter.as_ref()),
            Self::Categorical { layer, codes } => {
                RasterMask::from_categorical(ctx.categorical(layer)?, codes, grid)
            }
            Self::Continuous { layer, comparison } => {
                RasterMask::from_threshold(ctx.continuous(layer)?, |v| comparison.test(v), grid)
            }
            Self::Mask { layer } => Ok(ctx.mask(layer)?.clone()),
        }
    }
}
