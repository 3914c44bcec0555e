//! Boolean layers aligned to a [`GridSpec`].
use std::collections::VecDeque;

use geo_types::MultiPolygon;

use crate::error::{Result, StratError};
use crate::grid::GridSpec;
use crate::raster::Raster;
use crate::rasterize::rasterize_mask;

/// A 2-D boolean raster on a grid; `true` = the pixel belongs to the category.
///
/// The buffer always holds exactly `grid.len()` values.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMask {
    data: Vec<bool>,
    grid: GridSpec,
}

impl RasterMask {
    pub fn empty(grid: &GridSpec) -> Self {
        Self {
            data: vec![false; grid.len()],
            grid: grid.clone(),
        }
    }

    pub fn full(grid: &GridSpec) -> Self {
        Self {
            data: vec![true; grid.len()],
            grid: grid.clone(),
        }
    }

    /// Wrap a row-major boolean buffer.
    pub fn from_data(grid: &GridSpec, data: Vec<bool>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(StratError::shape(
                "mask data",
                grid.shape(),
                (data.len() / grid.cols(), grid.cols()),
            ));
        }
        Ok(Self {
            data,
            grid: grid.clone(),
        })
    }

    /// Caller guarantees `data.len() == grid.len()`.
    pub(crate) fn from_raw(grid: &GridSpec, data: Vec<bool>) -> Self {
        debug_assert_eq!(data.len(), grid.len());
        Self {
            data,
            grid: grid.clone(),
        }
    }

    /// Build a mask from a per-pixel predicate over `(row, col)`.
    pub fn from_fn(grid: &GridSpec, f: impl Fn(usize, usize) -> bool) -> Self {
        let data = (0..grid.len())
            .map(|i| {
                let (r, c) = grid.position(i);
                f(r, c)
            })
            .collect();
        Self {
            data,
            grid: grid.clone(),
        }
    }

    /// Rasterize polygons with the all-touched policy: every pixel whose
    /// footprint touches a polygon (boundary included) is `true`.
    /// No geometries → all-`false` mask.
    pub fn from_vector(geometries: &[MultiPolygon<f64>], grid: &GridSpec) -> Self {
        rasterize_mask(geometries, grid)
    }

    /// `true` where the raster value is one of `codes`. Nodata never matches.
    pub fn from_categorical(raster: &Raster<i32>, codes: &[i32], grid: &GridSpec) -> Result<Self> {
        grid.ensure_matches("categorical raster", raster)?;
        let data = raster
            .data
            .iter()
            .map(|&v| !raster.is_nodata(v) && codes.contains(&v))
            .collect();
        Ok(Self {
            data,
            grid: grid.clone(),
        })
    }

    /// `true` where `predicate(value)` holds. NaN and nodata are always `false`.
    pub fn from_threshold(
        raster: &Raster<f32>,
        predicate: impl Fn(f32) -> bool,
        grid: &GridSpec,
    ) -> Result<Self> {
        grid.ensure_matches("continuous raster", raster)?;
        let data = raster
            .data
            .iter()
            .map(|&v| !v.is_nan() && !raster.is_nodata(v) && predicate(v))
            .collect();
        Ok(Self {
            data,
            grid: grid.clone(),
        })
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn data(&self) -> &[bool] {
        &self.data
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[self.grid.index(row, col)]
    }

    /// Number of `true` pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// No pixel set.
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    /// Every pixel set.
    pub fn is_full(&self) -> bool {
        self.data.iter().all(|&v| v)
    }

    /// Row-major indices of `true` pixels.
    pub fn true_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.data.iter().enumerate().filter(|(_, &v)| v).map(|(i, _)| i)
    }

    pub fn and(&self, other: &RasterMask) -> Result<RasterMask> {
        self.zip_with(other, "mask AND", |a, b| a && b)
    }

    pub fn or(&self, other: &RasterMask) -> Result<RasterMask> {
        self.zip_with(other, "mask OR", |a, b| a || b)
    }

    /// `self AND NOT other`.
    pub fn and_not(&self, other: &RasterMask) -> Result<RasterMask> {
        self.zip_with(other, "mask AND NOT", |a, b| a && !b)
    }

    pub fn not(&self) -> RasterMask {
        Self {
            data: self.data.iter().map(|&v| !v).collect(),
            grid: self.grid.clone(),
        }
    }

    /// Drop 4-connected `true` regions smaller than `min_size` pixels, then
    /// fill 4-connected `false` regions smaller than `min_size` (grid edge
    /// included). Speckle cleanup for rasterized or thresholded masks.
    pub fn remove_small_objects(&self, min_size: usize) -> RasterMask {
        let mut data = self.data.clone();
        for value in [true, false] {
            for region in regions_4(&data, self.grid.rows(), self.grid.cols(), value) {
                if region.len() < min_size {
                    for i in region {
                        data[i] = !value;
                    }
                }
            }
        }
        Self {
            data,
            grid: self.grid.clone(),
        }
    }

    fn zip_with(&self, other: &RasterMask, op: &str, f: impl Fn(bool, bool) -> bool) -> Result<RasterMask> {
        if self.shape() != other.shape() {
            return Err(StratError::shape(op, self.shape(), other.shape()));
        }
        self.grid.ensure_same_grid(op, &other.grid)?;
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self {
            data,
            grid: self.grid.clone(),
        })
    }
}

/// 4-connected regions of pixels equal to `value`, as row-major index lists.
fn regions_4(data: &[bool], rows: usize, cols: usize, value: bool) -> Vec<Vec<usize>> {
    let mut seen = vec![false; data.len()];
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();
    for start in 0..data.len() {
        if seen[start] || data[start] != value {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut region = Vec::new();
        while let Some(i) = queue.pop_front() {
            region.push(i);
            let (r, c) = (i / cols, i % cols);
            let mut visit = |j: usize| {
                if !seen[j] && data[j] == value {
                    seen[j] = true;
                    queue.push_back(j);
                }
            };
            if r > 0 {
                visit(i - cols);
            }
            if r + 1 < rows {
                visit(i + cols);
            }
            if c > 0 {
                visit(i - 1);
            }
            if c + 1 < cols {
                visit(i + 1);
            }
        }
        regions.push(region);
    }
    regions
}
