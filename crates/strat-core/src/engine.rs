//! First-match-wins combination of rule masks into one classified raster.
//!
//! Rule order is the only tie-break. Each pixel receives the code of the
//! first rule whose mask contains it; overlaps between later masks are
//! expected and silently resolved. A pixel no rule claims aborts the run.
use log::{debug, info, warn};
use serde::Serialize;

use crate::classified::{ClassifiedRaster, RasterAttributes, MAX_ERROR_SAMPLES};
use crate::error::{Result, StratError};
use crate::grid::GridSpec;
use crate::layer::LayerContext;
use crate::mask::RasterMask;
use crate::rule::{ClassCode, RuleSet};

/// Raw (pre-assignment) pixel count of one rule's mask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleCoverage {
    pub name: String,
    pub code: ClassCode,
    pub pixels: usize,
}

/// Diagnostics on the raw rule masks, before priority resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskReport {
    pub total_pixels: usize,
    pub coverage: Vec<RuleCoverage>,
    /// Pixels claimed by more than one mask.
    pub overlapping_pixels: usize,
    /// Pixels claimed by no mask; these would fail classification.
    pub unclassified_pixels: usize,
}

impl MaskReport {
    fn build(rules: &RuleSet, masks: &[RasterMask], total_pixels: usize) -> Self {
        let mut hits = vec![0u32; total_pixels];
        for mask in masks {
            for i in mask.true_indices() {
                hits[i] += 1;
            }
        }
        Self {
            total_pixels,
            coverage: rules
                .iter()
                .zip(masks)
                .map(|(r, m)| RuleCoverage {
                    name: r.name().to_string(),
                    code: r.code(),
                    pixels: m.count(),
                })
                .collect(),
            overlapping_pixels: hits.iter().filter(|&&h| h > 1).count(),
            unclassified_pixels: hits.iter().filter(|&&h| h == 0).count(),
        }
    }
}

pub struct StratigraphyEngine {
    grid: GridSpec,
    rules: RuleSet,
    attributes: RasterAttributes,
}

impl StratigraphyEngine {
    pub fn new(grid: GridSpec, rules: RuleSet) -> Self {
        Self {
            grid,
            rules,
            attributes: RasterAttributes::default(),
        }
    }

    /// Attributes attached to every classified raster this engine produces.
    pub fn with_attributes(mut self, attributes: RasterAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify every pixel of the grid.
    ///
    /// Fails with `GridMismatch` when the context or a mask lives on another
    /// grid, `ShapeMismatch` when a rule's mask is shaped differently,
    /// `InvalidRule` when a description template cannot be rendered, and
    /// `IncompleteClassification` when pixels remain unclaimed.
    pub fn classify(&self, ctx: &LayerContext) -> Result<ClassifiedRaster> {
        self.grid.ensure_same_grid("layer context", ctx.grid())?;
        info!(
            "classifying {}×{} grid with {} rules",
            self.grid.rows(),
            self.grid.cols(),
            self.rules.len()
        );

        let legend = self.rules.legend(ctx.params())?;
        let masks = self.evaluate_masks(ctx)?;
        self.precheck(&masks);

        let mut codes: Vec<ClassCode> = vec![0; self.grid.len()];
        let mut classified = RasterMask::empty(&self.grid);
        for (rule, mask) in self.rules.iter().zip(&masks) {
            let contribution = mask.and_not(&classified)?;
            for i in contribution.true_indices() {
                codes[i] = rule.code();
            }
            debug!(
                "Adding `{}` to stratigraphy: {} of {} px claimed",
                rule.name(),
                contribution.count(),
                mask.count()
            );
            classified = classified.or(&contribution)?;
        }

        if !classified.is_full() {
            let gaps = classified.not();
            return Err(StratError::IncompleteClassification {
                unclassified: gaps.count(),
                sample: gaps
                    .true_indices()
                    .take(MAX_ERROR_SAMPLES)
                    .map(|i| self.grid.position(i))
                    .collect(),
            });
        }

        ClassifiedRaster::new(codes, self.grid.clone(), legend, self.attributes.clone())
    }

    /// Raw-mask diagnostics without classifying.
    pub fn inspect(&self, ctx: &LayerContext) -> Result<MaskReport> {
        self.grid.ensure_same_grid("layer context", ctx.grid())?;
        let masks = self.evaluate_masks(ctx)?;
        Ok(MaskReport::build(&self.rules, &masks, self.grid.len()))
    }

    fn evaluate_masks(&self, ctx: &LayerContext) -> Result<Vec<RasterMask>> {
        self.rules
            .iter()
            .map(|rule| {
                let mask = rule.evaluate(ctx)?;
                let context = format!("rule `{}`", rule.name());
                if mask.shape() != self.grid.shape() {
                    return Err(StratError::shape(context, self.grid.shape(), mask.shape()));
                }
                self.grid.ensure_same_grid(&context, mask.grid())?;
                Ok(mask)
            })
            .collect()
    }

    /// Diagnostics only; never fails.
    fn precheck(&self, masks: &[RasterMask]) {
        let last = masks.len().saturating_sub(1);
        for (i, (rule, mask)) in self.rules.iter().zip(masks).enumerate() {
            if mask.is_empty() {
                warn!("rule `{}` (code {}) matches no pixel", rule.name(), rule.code());
            } else if i < last && mask.is_full() {
                warn!(
                    "rule `{}` (code {}) covers the whole grid and shadows {} later rule(s)",
                    rule.name(),
                    rule.code(),
                    last - i
                );
            }
        }
        if log::log_enabled!(log::Level::Debug) {
            let report = MaskReport::build(&self.rules, masks, self.grid.len());
            debug!(
                "raw masks: {} overlapping px, {} uncovered px of {}",
                report.overlapping_pixels, report.unclassified_pixels, report.total_pixels
            );
        }
    }
}
