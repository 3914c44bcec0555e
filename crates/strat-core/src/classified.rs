//! The engine's output: one class code per pixel plus its legend.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratError};
use crate::grid::GridSpec;
use crate::legend::{Legend, LegendEntry};
use crate::mask::RasterMask;
use crate::rule::ClassCode;

/// At most this many unclassified coordinates are reported in an error.
pub(crate) const MAX_ERROR_SAMPLES: usize = 10;

/// Descriptive attributes carried with the output raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterAttributes {
    pub long_name: String,
    pub description: String,
}

/// Exhaustive, exclusive classification of a grid.
///
/// Only constructed through validation: every pixel holds a code > 0 that
/// the legend describes, and the buffer has exactly one value per grid
/// pixel. Deserialization re-validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClassifiedRepr")]
pub struct ClassifiedRaster {
    codes: Vec<ClassCode>,
    grid: GridSpec,
    legend: Legend,
    attributes: RasterAttributes,
}

#[derive(Deserialize)]
struct ClassifiedRepr {
    codes: Vec<ClassCode>,
    grid: GridSpec,
    legend: Legend,
    #[serde(default)]
    attributes: RasterAttributes,
}

impl TryFrom<ClassifiedRepr> for ClassifiedRaster {
    type Error = StratError;

    fn try_from(r: ClassifiedRepr) -> Result<Self> {
        ClassifiedRaster::new(r.codes, r.grid, r.legend, r.attributes)
    }
}

impl ClassifiedRaster {
    /// Validate and wrap a code buffer.
    ///
    /// * shape ≠ grid → `ShapeMismatch`
    /// * any code ≤ 0 → `IncompleteClassification`
    /// * a code missing from the legend → `LegendMismatch`
    pub fn new(
        codes: Vec<ClassCode>,
        grid: GridSpec,
        legend: Legend,
        attributes: RasterAttributes,
    ) -> Result<Self> {
        if codes.len() != grid.len() {
            return Err(StratError::shape(
                "classified raster",
                grid.shape(),
                (codes.len() / grid.cols(), grid.cols()),
            ));
        }

        let unclassified: Vec<usize> = codes
            .iter()
            .enumerate()
            .filter(|(_, &c)| c <= 0)
            .map(|(i, _)| i)
            .collect();
        if !unclassified.is_empty() {
            return Err(StratError::IncompleteClassification {
                unclassified: unclassified.len(),
                sample: unclassified
                    .iter()
                    .take(MAX_ERROR_SAMPLES)
                    .map(|&i| grid.position(i))
                    .collect(),
            });
        }

        let mut seen: Vec<ClassCode> = Vec::new();
        for &c in &codes {
            if !seen.contains(&c) {
                if !legend.contains(c) {
                    return Err(StratError::LegendMismatch { code: c });
                }
                seen.push(c);
            }
        }

        Ok(Self {
            codes,
            grid,
            legend,
            attributes,
        })
    }

    pub fn with_attributes(mut self, attributes: RasterAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn codes(&self) -> &[ClassCode] {
        &self.codes
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn legend(&self) -> &Legend {
        &self.legend
    }

    pub fn attributes(&self) -> &RasterAttributes {
        &self.attributes
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> ClassCode {
        self.codes[self.grid.index(row, col)]
    }

    pub fn legend_entry_at(&self, row: usize, col: usize) -> Option<&LegendEntry> {
        self.legend.get(self.get(row, col))
    }

    /// Pixels holding `code`.
    pub fn class_mask(&self, code: ClassCode) -> RasterMask {
        RasterMask::from_raw(&self.grid, self.codes.iter().map(|&c| c == code).collect())
    }

    /// Pixel count per code present.
    pub fn class_counts(&self) -> BTreeMap<ClassCode, usize> {
        let mut counts = BTreeMap::new();
        for &c in &self.codes {
            *counts.entry(c).or_insert(0) += 1;
        }
        counts
    }

    /// Codes present, in legend order.
    pub fn classes_present(&self) -> Vec<ClassCode> {
        let counts = self.class_counts();
        self.legend
            .codes()
            .into_iter()
            .filter(|c| counts.contains_key(c))
            .collect()
    }
}
