//! Single-band georeferenced rasters.
//!
//! Inputs arrive as `Raster<T>` and are checked against the run grid before
//! they take part in a classification.
use serde::{Deserialize, Serialize};

use crate::error::{Result, StratError};
use crate::grid::{Crs, GeoTransform, GridSpec};

/// A georeferenced single-band raster, row-major, row 0 = north.
///
/// Elevation models use `Raster<f32>` (metres, nodata → NaN); categorical
/// layers such as land cover use `Raster<i32>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster<T> {
    pub data: Vec<T>,
    pub rows: usize,
    pub cols: usize,
    /// `None` when the source carried no CRS; such rasters cannot define a grid.
    pub crs: Option<Crs>,
    pub transform: GeoTransform,
    #[serde(default)]
    pub nodata: Option<T>,
}

impl<T: Copy> Raster<T> {
    /// Create a raster filled with `fill`.
    pub fn new(rows: usize, cols: usize, crs: Option<Crs>, transform: GeoTransform, fill: T) -> Self {
        Self {
            data: vec![fill; rows * cols],
            rows,
            cols,
            crs,
            transform,
            nodata: None,
        }
    }

    /// Create a raster filled with `fill` lying exactly on `grid`.
    pub fn on_grid(grid: &GridSpec, fill: T) -> Self {
        Self::new(grid.rows(), grid.cols(), Some(grid.crs().clone()), *grid.transform(), fill)
    }

    /// Wrap row-major `data` as a raster on `grid`.
    pub fn from_grid_data(grid: &GridSpec, data: Vec<T>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(StratError::shape(
                "raster data",
                grid.shape(),
                (data.len() / grid.cols().max(1), grid.cols()),
            ));
        }
        Ok(Self {
            data,
            rows: grid.rows(),
            cols: grid.cols(),
            crs: Some(grid.crs().clone()),
            transform: *grid.transform(),
            nodata: None,
        })
    }

    pub fn with_nodata(mut self, nodata: T) -> Self {
        self.nodata = Some(nodata);
        self
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.cols + col] = val;
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Apply `f` to every value, keeping georeferencing. Nodata is not carried over.
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Raster<U> {
        Raster {
            data: self.data.iter().map(|&v| f(v)).collect(),
            rows: self.rows,
            cols: self.cols,
            crs: self.crs.clone(),
            transform: self.transform,
            nodata: None,
        }
    }

    /// Nearest-neighbour resampling onto `grid`.
    ///
    /// This is the only way a layer moves between grids: the CRS must already
    /// agree (cross-CRS reprojection belongs to the fetch layer). Target pixels
    /// whose centre falls outside this raster receive `fill`.
    pub fn resample_to(&self, grid: &GridSpec, fill: T) -> Result<Raster<T>> {
        match &self.crs {
            None => return Err(StratError::grid("resample", "source raster has no CRS")),
            Some(crs) if crs != grid.crs() => {
                return Err(StratError::grid(
                    "resample",
                    format!("cannot resample {crs} onto a {} grid", grid.crs()),
                ))
            }
            Some(_) => {}
        }
        if self.data.len() != self.rows * self.cols {
            return Err(StratError::shape(
                "resample source",
                (self.rows, self.cols),
                (self.data.len() / self.cols.max(1), self.cols),
            ));
        }

        let t = &self.transform;
        let mut out = Raster::on_grid(grid, fill);
        for r in 0..grid.rows() {
            for c in 0..grid.cols() {
                let (x, y) = grid.pixel_center(r, c);
                let sc = ((x - t.west) / t.pixel_width).floor();
                let sr = ((t.north - y) / t.pixel_height).floor();
                if sc < 0.0 || sr < 0.0 || sc >= self.cols as f64 || sr >= self.rows as f64 {
                    continue;
                }
                out.set(r, c, self.get(sr as usize, sc as usize));
            }
        }
        out.nodata = self.nodata;
        Ok(out)
    }
}

impl<T: Copy + PartialEq> Raster<T> {
    /// True when `value` equals the declared nodata value.
    #[inline]
    pub fn is_nodata(&self, value: T) -> bool {
        self.nodata == Some(value)
    }
}

impl Raster<f32> {
    /// Replace declared nodata values with NaN and clear the nodata marker.
    pub fn nodata_to_nan(&self) -> Raster<f32> {
        let nodata = self.nodata;
        let mut out = self.map(|v| if Some(v) == nodata { f32::NAN } else { v });
        out.nodata = None;
        out
    }

    /// Smallest non-NaN value; `+inf` when every cell is NaN.
    pub fn min_value(&self) -> f32 {
        self.data.iter().cloned().filter(|v| !v.is_nan()).fold(f32::INFINITY, f32::min)
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().cloned().filter(|v| !v.is_nan()).fold(f32::NEG_INFINITY, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn grid(rows: usize, cols: usize, size: f64) -> GridSpec {
        GridSpec::new(Crs::epsg(32643), GeoTransform::new(0.0, 120.0, size, size), rows, cols).unwrap()
    }

    #[test]
    fn get_set_are_row_major() {
        let mut r = Raster::on_grid(&grid(3, 4, 30.0), 0i32);
        r.set(1, 2, 7);
        assert_eq!(r.data[1 * 4 + 2], 7);
        assert_eq!(r.get(1, 2), 7);
    }

    #[test]
    fn from_grid_data_rejects_wrong_length() {
        let g = grid(3, 3, 30.0);
        assert_matches!(
            Raster::from_grid_data(&g, vec![0i32; 8]),
            Err(StratError::ShapeMismatch { .. })
        );
    }

    #[test]
    fn nodata_becomes_nan() {
        let g = grid(1, 3, 30.0);
        let r = Raster::from_grid_data(&g, vec![1.0f32, -9999.0, 3.0])
            .unwrap()
            .with_nodata(-9999.0);
        let n = r.nodata_to_nan();
        assert!(n.data[1].is_nan());
        assert_eq!(n.min_value(), 1.0);
        assert_eq!(n.max_value(), 3.0);
    }

    #[test]
    fn resample_halves_resolution_by_nearest_neighbour() {
        // 2×2 source at 60 m onto a 4×4 target at 30 m over the same extent.
        let src_grid = grid(2, 2, 60.0);
        let src = Raster::from_grid_data(&src_grid, vec![1i32, 2, 3, 4]).unwrap();
        let dst_grid = grid(4, 4, 30.0);
        let out = src.resample_to(&dst_grid, 0).unwrap();
        assert!(dst_grid.matches(&out));
        assert_eq!(out.get(0, 0), 1);
        assert_eq!(out.get(1, 1), 1);
        assert_eq!(out.get(0, 3), 2);
        assert_eq!(out.get(3, 0), 3);
        assert_eq!(out.get(3, 3), 4);
    }

    #[test]
    fn resample_fills_outside_source() {
        let src = Raster::from_grid_data(&grid(1, 1, 30.0), vec![5i32]).unwrap();
        let out = src.resample_to(&grid(2, 2, 30.0), -1).unwrap();
        assert_eq!(out.data, vec![5, -1, -1, -1]);
    }

    #[test]
    fn resample_refuses_other_crs() {
        let mut src = Raster::on_grid(&grid(2, 2, 30.0), 0i32);
        src.crs = Some(Crs::wgs84());
        assert_matches!(
            src.resample_to(&grid(2, 2, 30.0), 0),
            Err(StratError::GridMismatch { .. })
        );
    }
}
