//! Classification rules: a class code, its legend metadata, and the mask
//! expression that selects its pixels.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strfmt::DisplayStr;

use crate::error::{Result, StratError};
use crate::layer::{LayerContext, LayerSource};
use crate::legend::{Color, Legend, LegendEntry};
use crate::mask::RasterMask;

/// Integer class code written to the classified raster. Valid codes are > 0;
/// 0 and negatives mean unclassified / nodata.
pub type ClassCode = i32;

// ── Template parameters ─────────────────────────────────────────────────────

/// Value substituted into description templates (`{slope_threshold}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl DisplayStr for ParamValue {
    fn display_str(&self, f: &mut strfmt::Formatter) -> strfmt::Result<()> {
        f.str(&self.to_string())?;
        Ok(())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// ── Mask expressions ────────────────────────────────────────────────────────

type MaskFn = dyn Fn(&LayerContext) -> Result<RasterMask> + Send + Sync;

/// Mask computed by arbitrary code. Not serializable.
#[derive(Clone)]
pub struct CustomMask(Arc<MaskFn>);

impl CustomMask {
    pub fn new(f: impl Fn(&LayerContext) -> Result<RasterMask> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CustomMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomMask(..)")
    }
}

/// Boolean expression over layer sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskExpr {
    Source(LayerSource),
    /// Intersection; empty → everywhere.
    And(Vec<MaskExpr>),
    /// Union; empty → nowhere.
    Or(Vec<MaskExpr>),
    Not(Box<MaskExpr>),
    /// Every pixel of the grid. Used for catch-all rules.
    Everywhere,
    #[serde(skip)]
    Custom(CustomMask),
}

impl MaskExpr {
    pub fn custom(f: impl Fn(&LayerContext) -> Result<RasterMask> + Send + Sync + 'static) -> Self {
        Self::Custom(CustomMask::new(f))
    }

    /// Evaluate against `ctx`. Pure: the context is never modified.
    pub fn evaluate(&self, ctx: &LayerContext) -> Result<RasterMask> {
        match self {
            MaskExpr::Source(src) => src.to_mask(ctx),
            MaskExpr::And(items) => items
                .iter()
                .try_fold(RasterMask::full(ctx.grid()), |acc, e| acc.and(&e.evaluate(ctx)?)),
            MaskExpr::Or(items) => items
                .iter()
                .try_fold(RasterMask::empty(ctx.grid()), |acc, e| acc.or(&e.evaluate(ctx)?)),
            MaskExpr::Not(inner) => Ok(inner.evaluate(ctx)?.not()),
            MaskExpr::Everywhere => Ok(RasterMask::full(ctx.grid())),
            MaskExpr::Custom(f) => (f.0)(ctx),
        }
    }
}

impl From<LayerSource> for MaskExpr {
    fn from(src: LayerSource) -> Self {
        MaskExpr::Source(src)
    }
}

impl ops::BitAnd for MaskExpr {
    type Output = MaskExpr;

    fn bitand(self, rhs: MaskExpr) -> MaskExpr {
        match self {
            MaskExpr::And(mut items) => {
                items.push(rhs);
                MaskExpr::And(items)
            }
            lhs => MaskExpr::And(vec![lhs, rhs]),
        }
    }
}

impl ops::BitOr for MaskExpr {
    type Output = MaskExpr;

    fn bitor(self, rhs: MaskExpr) -> MaskExpr {
        match self {
            MaskExpr::Or(mut items) => {
                items.push(rhs);
                MaskExpr::Or(items)
            }
            lhs => MaskExpr::Or(vec![lhs, rhs]),
        }
    }
}

impl ops::Not for MaskExpr {
    type Output = MaskExpr;

    fn not(self) -> MaskExpr {
        match self {
            MaskExpr::Not(inner) => *inner,
            e => MaskExpr::Not(Box::new(e)),
        }
    }
}

// ── Rules ───────────────────────────────────────────────────────────────────

/// One output class. Construct through [`ClassificationRule::new`] or
/// [`ClassificationRule::builder`]; both validate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr")]
pub struct ClassificationRule {
    name: String,
    code: ClassCode,
    description: String,
    color: Color,
    mask: MaskExpr,
}

#[derive(Deserialize)]
struct RuleRepr {
    name: String,
    code: ClassCode,
    description: String,
    color: String,
    mask: MaskExpr,
}

impl TryFrom<RuleRepr> for ClassificationRule {
    type Error = StratError;

    fn try_from(repr: RuleRepr) -> Result<Self> {
        ClassificationRule::new(repr.name, repr.code, repr.description, &repr.color, repr.mask)
    }
}

impl ClassificationRule {
    pub fn new(
        name: impl Into<String>,
        code: ClassCode,
        description: impl Into<String>,
        color: &str,
        mask: MaskExpr,
    ) -> Result<Self> {
        let name = name.into();
        let description = description.into();
        if name.trim().is_empty() {
            return Err(StratError::rule(format!("code {code}"), "empty name"));
        }
        if code <= 0 {
            return Err(StratError::rule(
                &name,
                format!("code must be > 0 (0 and negatives mean unclassified), got {code}"),
            ));
        }
        if description.trim().is_empty() {
            return Err(StratError::rule(&name, "empty description"));
        }
        let Some(color) = Color::parse_hex(color) else {
            return Err(StratError::rule(&name, format!("`{color}` is not a #RRGGBB color")));
        };
        Ok(Self {
            name,
            code,
            description,
            color,
            mask,
        })
    }

    pub fn builder(name: impl Into<String>, code: ClassCode) -> RuleBuilder {
        RuleBuilder {
            name: name.into(),
            code,
            description: String::new(),
            color: String::new(),
            mask: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> ClassCode {
        self.code
    }

    /// Unrendered description template.
    pub fn description_template(&self) -> &str {
        &self.description
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn mask(&self) -> &MaskExpr {
        &self.mask
    }

    pub fn evaluate(&self, ctx: &LayerContext) -> Result<RasterMask> {
        self.mask.evaluate(ctx)
    }

    /// Render the description, substituting `{name}` placeholders from `params`.
    pub fn describe(&self, params: &BTreeMap<String, ParamValue>) -> Result<String> {
        let vars: HashMap<String, ParamValue> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        strfmt::strfmt(&self.description, &vars)
            .map_err(|e| StratError::rule(&self.name, format!("description template: {e}")))
    }

    pub fn legend_entry(&self, params: &BTreeMap<String, ParamValue>) -> Result<LegendEntry> {
        Ok(LegendEntry {
            code: self.code,
            name: self.name.clone(),
            description: self.describe(params)?,
            color: self.color,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RuleBuilder {
    name: String,
    code: ClassCode,
    description: String,
    color: String,
    mask: Option<MaskExpr>,
}

impl RuleBuilder {
    pub fn description(mut self, template: impl Into<String>) -> Self {
        self.description = template.into();
        self
    }

    pub fn color(mut self, hex: impl Into<String>) -> Self {
        self.color = hex.into();
        self
    }

    pub fn mask(mut self, mask: impl Into<MaskExpr>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    pub fn build(self) -> Result<ClassificationRule> {
        let Some(mask) = self.mask else {
            return Err(StratError::rule(self.name, "no mask expression"));
        };
        ClassificationRule::new(self.name, self.code, self.description, &self.color, mask)
    }
}

// ── Rule sets ───────────────────────────────────────────────────────────────

/// Ordered, validated rule list. Position is priority: the first rule whose
/// mask contains a pixel claims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<ClassificationRule>", into = "Vec<ClassificationRule>")]
pub struct RuleSet {
    rules: Vec<ClassificationRule>,
}

impl RuleSet {
    /// Fails on an empty list, duplicate codes, or duplicate names.
    pub fn new(rules: Vec<ClassificationRule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(StratError::rule("rule set", "no rules"));
        }
        let mut codes = HashSet::new();
        let mut names = HashSet::new();
        for rule in &rules {
            if !codes.insert(rule.code) {
                return Err(StratError::rule(
                    &rule.name,
                    format!("duplicate class code {}", rule.code),
                ));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(StratError::rule(&rule.name, "duplicate rule name"));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassificationRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, code: ClassCode) -> Option<&ClassificationRule> {
        self.rules.iter().find(|r| r.code == code)
    }

    pub fn codes(&self) -> Vec<ClassCode> {
        self.rules.iter().map(|r| r.code).collect()
    }

    /// Legend in priority order with rendered descriptions.
    pub fn legend(&self, params: &BTreeMap<String, ParamValue>) -> Result<Legend> {
        let entries = self
            .rules
            .iter()
            .map(|r| r.legend_entry(params))
            .collect::<Result<Vec<_>>>()?;
        Ok(Legend::new(entries))
    }
}

impl TryFrom<Vec<ClassificationRule>> for RuleSet {
    type Error = StratError;

    fn try_from(rules: Vec<ClassificationRule>) -> Result<Self> {
        RuleSet::new(rules)
    }
}

impl From<RuleSet> for Vec<ClassificationRule> {
    fn from(set: RuleSet) -> Self {
        set.rules
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a ClassificationRule;
    type IntoIter = std::slice::Iter<'a, ClassificationRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Crs, GeoTransform, GridSpec};
    use crate::layer::Comparison;
    use crate::raster::Raster;
    use assert_matches::assert_matches;

    fn everywhere(name: &str, code: ClassCode) -> ClassificationRule {
        ClassificationRule::new(name, code, "Anything", "#000000", MaskExpr::Everywhere).unwrap()
    }

    fn context() -> LayerContext {
        let g = GridSpec::new(Crs::epsg(32643), GeoTransform::new(0.0, 1.0, 1.0, 1.0), 1, 4).unwrap();
        let mut ctx = LayerContext::new(g.clone());
        ctx.insert_categorical("lc", Raster::from_grid_data(&g, vec![60, 60, 20, 100]).unwrap())
            .unwrap();
        ctx.insert_continuous("slope", Raster::from_grid_data(&g, vec![45.0, 10.0, 45.0, 10.0]).unwrap())
            .unwrap();
        ctx
    }

    #[test]
    fn construction_validates_fields() {
        let mask = || MaskExpr::Everywhere;
        assert_matches!(
            ClassificationRule::new("a", 0, "d", "#000000", mask()),
            Err(StratError::InvalidRule { .. })
        );
        assert_matches!(
            ClassificationRule::new("a", -3, "d", "#000000", mask()),
            Err(StratError::InvalidRule { .. })
        );
        assert_matches!(
            ClassificationRule::new(" ", 1, "d", "#000000", mask()),
            Err(StratError::InvalidRule { .. })
        );
        assert_matches!(
            ClassificationRule::new("a", 1, "", "#000000", mask()),
            Err(StratError::InvalidRule { .. })
        );
        assert_matches!(
            ClassificationRule::new("a", 1, "d", "black", mask()),
            Err(StratError::InvalidRule { rule, .. }) if rule == "a"
        );
    }

    #[test]
    fn builder_requires_mask() {
        let r = ClassificationRule::builder("bedrock", 3)
            .description("Bedrock")
            .color("#485b73")
            .build();
        assert_matches!(r, Err(StratError::InvalidRule { .. }));
    }

    #[test]
    fn description_placeholders_are_rendered() {
        let rule = ClassificationRule::builder("bedrock", 3)
            .description("Bedrock (slope > {slope_threshold}{space}deg)")
            .color("#485b73")
            .mask(MaskExpr::Everywhere)
            .build()
            .unwrap();
        let mut params = BTreeMap::new();
        params.insert("slope_threshold".to_string(), ParamValue::from(30.0));
        params.insert("space".to_string(), ParamValue::from(" "));
        assert_eq!(rule.describe(&params).unwrap(), "Bedrock (slope > 30 deg)");
    }

    #[test]
    fn unknown_placeholder_is_an_invalid_rule() {
        let rule = ClassificationRule::new("x", 1, "needs {missing}", "#000000", MaskExpr::Everywhere).unwrap();
        assert_matches!(rule.describe(&BTreeMap::new()), Err(StratError::InvalidRule { .. }));
    }

    #[test]
    fn rule_set_rejects_duplicates_and_empty() {
        assert_matches!(RuleSet::new(Vec::new()), Err(StratError::InvalidRule { .. }));
        assert_matches!(
            RuleSet::new(vec![everywhere("a", 1), everywhere("b", 1)]),
            Err(StratError::InvalidRule { rule, .. }) if rule == "b"
        );
        assert_matches!(
            RuleSet::new(vec![everywhere("a", 1), everywhere("a", 2)]),
            Err(StratError::InvalidRule { .. })
        );
        let set = RuleSet::new(vec![everywhere("a", 2), everywhere("b", 1)]).unwrap();
        assert_eq!(set.codes(), vec![2, 1]);
        assert_eq!(set.get(1).map(|r| r.name()), Some("b"));
    }

    #[test]
    fn expressions_combine_sources() {
        let ctx = context();
        let bare: MaskExpr = LayerSource::categorical("lc", [60]).into();
        let steep: MaskExpr = LayerSource::continuous("slope", Comparison::Gt(30.0)).into();

        let bedrock = bare.clone() & steep.clone();
        assert_eq!(bedrock.evaluate(&ctx).unwrap().data(), &[true, false, false, false]);

        let either = bare.clone() | steep.clone();
        assert_eq!(either.evaluate(&ctx).unwrap().data(), &[true, true, true, false]);

        let soil = bare & !steep;
        assert_eq!(soil.evaluate(&ctx).unwrap().data(), &[false, true, false, false]);

        assert!(MaskExpr::And(Vec::new()).evaluate(&ctx).unwrap().is_full());
        assert!(MaskExpr::Or(Vec::new()).evaluate(&ctx).unwrap().is_empty());
    }

    #[test]
    fn double_negation_collapses() {
        let e = !!MaskExpr::Everywhere;
        assert_matches!(e, MaskExpr::Everywhere);
    }

    #[test]
    fn custom_masks_see_the_context() {
        let ctx = context();
        let first_col = MaskExpr::custom(|ctx| Ok(RasterMask::from_fn(ctx.grid(), |_, c| c == 0)));
        assert_eq!(first_col.evaluate(&ctx).unwrap().count(), 1);
        assert!(serde_json::to_string(&first_col).is_err());
    }

    #[test]
    fn rules_load_from_json() {
        let json = r##"[
            {"name": "bedrock", "code": 3, "description": "Bedrock", "color": "#485b73",
             "mask": {"and": [
                {"source": {"kind": "categorical", "layer": "lc", "codes": [60, 70]}},
                {"source": {"kind": "continuous", "layer": "slope", "comparison": {"gt": 30.0}}}
             ]}},
            {"name": "rest", "code": 9, "description": "Rest", "color": "#FFFFFF", "mask": "everywhere"}
        ]"##;
        let set: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.len(), 2);
        let m = set.rules()[0].evaluate(&context()).unwrap();
        assert_eq!(m.data(), &[true, false, false, false]);

        let bad = r##"[{"name": "x", "code": 0, "description": "X", "color": "#FFFFFF", "mask": "everywhere"}]"##;
        assert!(serde_json::from_str::<RuleSet>(bad).is_err());
    }
}
