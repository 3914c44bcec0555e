//! Shared raster grid definition.
//!
//! Every layer taking part in a classification run is aligned to one
//! [`GridSpec`]: same CRS, same north-up geotransform, same shape. The grid is
//! derived once from the elevation model and never changes afterwards.
//!
//! Row 0 is the northernmost row; column 0 the westernmost column.
use std::fmt;

use geo_types::{coord, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StratError};
use crate::raster::Raster;

/// Relative tolerance (fraction of a pixel) when comparing two geotransforms.
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// Coordinate reference system identifier, normalized to upper case
/// (e.g. `EPSG:32643`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Crs(String);

impl Crs {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_uppercase())
    }

    pub fn epsg(code: u32) -> Self {
        Self(format!("EPSG:{code}"))
    }

    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A blank identifier names no CRS.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn epsg_code(&self) -> Option<u32> {
        self.0.strip_prefix("EPSG:")?.parse().ok()
    }

    /// True for CRSs whose units are degrees of latitude/longitude.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg_code(), Some(4326) | Some(4258) | Some(4269))
    }
}

impl From<String> for Crs {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// North-up affine transform: pixel (row, col) covers
/// `[west + col·w, west + (col+1)·w] × [north − (row+1)·h, north − row·h]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub west: f64,
    pub north: f64,
    /// Pixel width in CRS units, > 0.
    pub pixel_width: f64,
    /// Pixel height in CRS units, > 0 (rows advance southward).
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(west: f64, north: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            west,
            north,
            pixel_width,
            pixel_height,
        }
    }

    /// Transform for `rows × cols` pixels exactly covering the given bounds.
    pub fn from_bounds(bounds: Bounds, rows: usize, cols: usize) -> Self {
        Self {
            west: bounds.west,
            north: bounds.north,
            pixel_width: (bounds.east - bounds.west) / cols.max(1) as f64,
            pixel_height: (bounds.north - bounds.south) / rows.max(1) as f64,
        }
    }

    fn aligned_with(&self, other: &GeoTransform) -> bool {
        let tol_x = self.pixel_width.abs() * ALIGNMENT_TOLERANCE;
        let tol_y = self.pixel_height.abs() * ALIGNMENT_TOLERANCE;
        (self.west - other.west).abs() <= tol_x
            && (self.north - other.north).abs() <= tol_y
            && (self.pixel_width - other.pixel_width).abs() <= tol_x
            && (self.pixel_height - other.pixel_height).abs() <= tol_y
    }
}

/// Bounding box in CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn to_rect(self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
    }
}

/// Canonical grid shared by all layers of one classification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GridSpecRepr")]
pub struct GridSpec {
    crs: Crs,
    transform: GeoTransform,
    rows: usize,
    cols: usize,
}

#[derive(Deserialize)]
struct GridSpecRepr {
    crs: Crs,
    transform: GeoTransform,
    rows: usize,
    cols: usize,
}

impl TryFrom<GridSpecRepr> for GridSpec {
    type Error = StratError;

    fn try_from(repr: GridSpecRepr) -> Result<Self> {
        GridSpec::new(repr.crs, repr.transform, repr.rows, repr.cols)
    }
}

impl PartialEq for GridSpec {
    fn eq(&self, other: &Self) -> bool {
        self.same_grid(other)
    }
}

impl GridSpec {
    pub fn new(crs: Crs, transform: GeoTransform, rows: usize, cols: usize) -> Result<Self> {
        if crs.is_empty() {
            return Err(StratError::grid("grid", "CRS identifier is blank"));
        }
        if rows == 0 || cols == 0 {
            return Err(StratError::grid(
                "grid",
                format!("zero-sized grid ({rows}×{cols})"),
            ));
        }
        let valid_size = |v: f64| v.is_finite() && v > 0.0;
        if !valid_size(transform.pixel_width) || !valid_size(transform.pixel_height) {
            return Err(StratError::grid(
                "grid",
                format!(
                    "pixel size must be finite and positive, got {}×{}",
                    transform.pixel_width, transform.pixel_height
                ),
            ));
        }
        Ok(Self {
            crs,
            transform,
            rows,
            cols,
        })
    }

    pub fn from_bounds(crs: Crs, bounds: Bounds, rows: usize, cols: usize) -> Result<Self> {
        Self::new(crs, GeoTransform::from_bounds(bounds, rows, cols), rows, cols)
    }

    /// Derive the grid from an aligned reference raster (normally the DEM).
    ///
    /// Fails when the reference has no (or a blank) CRS, a zero dimension, or a data
    /// buffer that does not hold `rows × cols` values.
    pub fn from_reference<T>(reference: &Raster<T>) -> Result<Self> {
        let Some(crs) = reference.crs.clone() else {
            return Err(StratError::grid("reference", "raster has no CRS"));
        };
        if reference.data.len() != reference.rows * reference.cols {
            return Err(StratError::grid(
                "reference",
                format!(
                    "{} values stored for a {}×{} raster",
                    reference.data.len(),
                    reference.rows,
                    reference.cols
                ),
            ));
        }
        Self::new(crs, reference.transform, reference.rows, reference.cols)
            .map_err(|e| match e {
                StratError::GridMismatch { reason, .. } => StratError::grid("reference", reason),
                other => other,
            })
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of pixels.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(x, y)` pixel size in CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        (self.transform.pixel_width, self.transform.pixel_height)
    }

    pub fn bounds(&self) -> Bounds {
        let t = &self.transform;
        Bounds {
            west: t.west,
            south: t.north - self.rows as f64 * t.pixel_height,
            east: t.west + self.cols as f64 * t.pixel_width,
            north: t.north,
        }
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// `(row, col)` of a row-major index.
    #[inline]
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    /// Footprint of pixel `(row, col)` in CRS units.
    pub fn pixel_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let t = &self.transform;
        let x0 = t.west + col as f64 * t.pixel_width;
        let y1 = t.north - row as f64 * t.pixel_height;
        Rect::new(
            coord! { x: x0, y: y1 - t.pixel_height },
            coord! { x: x0 + t.pixel_width, y: y1 },
        )
    }

    /// Centre of pixel `(row, col)` in CRS units.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        (
            t.west + (col as f64 + 0.5) * t.pixel_width,
            t.north - (row as f64 + 0.5) * t.pixel_height,
        )
    }

    /// Pixel containing `(x, y)`, or `None` outside the grid.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let t = &self.transform;
        let col = ((x - t.west) / t.pixel_width).floor();
        let row = ((t.north - y) / t.pixel_height).floor();
        if !col.is_finite() || !row.is_finite() {
            return None;
        }
        if col < 0.0 || row < 0.0 || col >= self.cols as f64 || row >= self.rows as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Lattice vertex `(col, row)` → CRS coordinates. Used by vectorization.
    pub(crate) fn vertex_to_world(&self, col: i64, row: i64) -> (f64, f64) {
        let t = &self.transform;
        (
            t.west + col as f64 * t.pixel_width,
            t.north - row as f64 * t.pixel_height,
        )
    }

    /// True when `raster` lies on exactly this grid.
    pub fn matches<T>(&self, raster: &Raster<T>) -> bool {
        self.mismatch(raster.crs.as_ref(), &raster.transform, raster.rows, raster.cols, raster.data.len())
            .is_none()
    }

    /// Like [`GridSpec::matches`] but reports the first differing property.
    pub fn ensure_matches<T>(&self, layer: &str, raster: &Raster<T>) -> Result<()> {
        match self.mismatch(raster.crs.as_ref(), &raster.transform, raster.rows, raster.cols, raster.data.len()) {
            None => Ok(()),
            Some(reason) => Err(StratError::grid(layer, reason)),
        }
    }

    /// Grid equality with floating tolerance on the geotransform.
    pub fn same_grid(&self, other: &GridSpec) -> bool {
        self.mismatch(Some(&other.crs), &other.transform, other.rows, other.cols, other.len())
            .is_none()
    }

    pub(crate) fn ensure_same_grid(&self, layer: &str, other: &GridSpec) -> Result<()> {
        match self.mismatch(Some(&other.crs), &other.transform, other.rows, other.cols, other.len()) {
            None => Ok(()),
            Some(reason) => Err(StratError::grid(layer, reason)),
        }
    }

    fn mismatch(
        &self,
        crs: Option<&Crs>,
        transform: &GeoTransform,
        rows: usize,
        cols: usize,
        stored: usize,
    ) -> Option<String> {
        match crs {
            None => return Some("layer has no CRS".to_string()),
            Some(crs) if crs != &self.crs => {
                return Some(format!("CRS {crs} differs from grid CRS {}", self.crs))
            }
            Some(_) => {}
        }
        if (rows, cols) != (self.rows, self.cols) {
            return Some(format!(
                "shape {rows}×{cols} differs from grid shape {}×{}",
                self.rows, self.cols
            ));
        }
        if stored != rows * cols {
            return Some(format!("{stored} values stored for a {rows}×{cols} layer"));
        }
        if !self.transform.aligned_with(transform) {
            return Some(format!(
                "geotransform {transform:?} is not aligned with grid {:?}",
                self.transform
            ));
        }
        None
    }
}
