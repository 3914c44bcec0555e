//! Error taxonomy shared by every stage of a classification run.
//!
//! All variants are fatal for the operation that raised them. Nothing in the
//! crate retries or degrades to a partial result.
use thiserror::Error;

use crate::rule::ClassCode;

pub type Result<T> = std::result::Result<T, StratError>;

#[derive(Debug, Error)]
pub enum StratError {
    /// A layer's CRS, resolution, alignment or shape disagrees with the run grid,
    /// or a reference raster cannot define a grid at all.
    #[error("grid mismatch for `{layer}`: {reason}")]
    GridMismatch { layer: String, reason: String },

    /// Two arrays that must be combined elementwise have different (rows, cols).
    #[error("shape mismatch in {context}: expected {expected:?} (rows, cols), found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid rule `{rule}`: {reason}")]
    InvalidRule { rule: String, reason: String },

    /// Pixels left without a class after the assignment pass.
    #[error("{unclassified} pixel(s) left unclassified, e.g. (row, col) {sample:?}")]
    IncompleteClassification {
        unclassified: usize,
        sample: Vec<(usize, usize)>,
    },

    /// A classified raster holds a code the legend does not describe.
    #[error("class code {code} is not in the legend")]
    LegendMismatch { code: ClassCode },

    #[error("too many classes to vectorize: {found} > {max}")]
    TooManyClasses { found: usize, max: usize },

    #[error("layer `{0}` is not registered in the layer context")]
    MissingLayer(String),

    #[error("layer `{name}` is a {found} layer, expected {expected}")]
    LayerKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl StratError {
    pub(crate) fn grid(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GridMismatch {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(
        context: impl Into<String>,
        expected: (usize, usize),
        found: (usize, usize),
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}
