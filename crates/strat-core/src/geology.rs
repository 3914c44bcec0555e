//! Bedrock geology of the former USSR (USGS map units).
//!
//! Map units are keyed by the `GLG` attribute. Each key resolves to a long
//! name and, where one dominates, a representative rock type.
use std::collections::BTreeSet;
use std::fmt;

use geo_types::MultiPolygon;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::GridSpec;
use crate::layer::VectorLayer;
use crate::raster::Raster;
use crate::rasterize::rasterize_codes;

use self::RockType::{Granite, Limestone, Sandstone, Schist};

/// Attribute holding the map unit key.
pub const GEOLOGY_KEY_COLUMN: &str = "GLG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RockType {
    Granite = 1,
    Limestone = 2,
    Sandstone = 3,
    Schist = 4,
}

impl RockType {
    pub const ALL: [RockType; 4] = [Self::Granite, Self::Limestone, Self::Sandstone, Self::Schist];

    /// Raster code; 0 is left for unclassified.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Granite => "granite",
            Self::Limestone => "limestone",
            Self::Sandstone => "sandstone",
            Self::Schist => "schist",
        }
    }
}

impl fmt::Display for RockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeologyUnit {
    pub key: &'static str,
    /// `None` for water, ice and areas outside the map.
    pub long_name: Option<&'static str>,
    pub rock_type: Option<RockType>,
}

#[rustfmt::skip]
const UNITS: &[(&str, &str, Option<RockType>)] = &[
    ("A",    "Archean",                                                       Some(Granite)),
    ("C",    "Carboniferous",                                                 Some(Limestone)),
    ("CD",   "Carboniferous and Devonian",                                    Some(Limestone)),
    ("Cm",   "Cambrian",                                                      Some(Sandstone)),
    ("CmPt", "Cambrian-Proterozoic",                                          Some(Schist)),
    ("D",    "Devonian (undivided)",                                          Some(Limestone)),
    ("DS",   "Devonian and Silurian",                                         Some(Limestone)),
    ("J",    "Jurassic (undivided)",                                          Some(Limestone)),
    ("JTr",  "Jurassic and Triassic",                                         Some(Sandstone)),
    ("K",    "Cretaceous (undivided)",                                        Some(Sandstone)),
    ("KJ",   "Cretaceous and Jurassic",                                       Some(Sandstone)),
    ("Mi",   "Acidic Mesozoic intrusive rocks",                               Some(Granite)),
    ("N",    "Neogene",                                                       Some(Sandstone)),
    ("NPg",  "Neogene and Paleogene",                                         Some(Limestone)),
    ("O",    "Ordovician",                                                    Some(Limestone)),
    ("OCm",  "Ordovician-Cambrian",                                           Some(Limestone)),
    ("P",    "Permian",                                                       Some(Limestone)),
    ("PC",   "Permian-Carboniferous",                                         Some(Limestone)),
    ("Pz",   "Paleozoic (undivided)",                                         Some(Sandstone)),
    ("PZ",   "Paleozoic (undivided)",                                         Some(Sandstone)),
    ("Pg",   "Paleogene",                                                     Some(Limestone)),
    ("PgK",  "Paleogene and Cretaceous",                                      Some(Limestone)),
    ("Pi",   "Paleozoic intrusive rocks",                                     Some(Granite)),
    ("Pt",   "Proterozoic",                                                   Some(Schist)),
    ("PtA",  "Acidic Proterozoic and Archean intrusive rocks",                Some(Granite)),
    ("PtAi", "Acidic Proterozoic and Archean intrusive rocks",                Some(Granite)),
    ("Q",    "Quaternary (undivided)",                                        Some(Sandstone)),
    ("QT",   "Quaternary and Tertiary",                                       Some(Sandstone)),
    ("Qv",   "Extrusive rocks Pliocene and Quaternary",                       Some(Sandstone)),
    ("S",    "Silurian",                                                      Some(Limestone)),
    ("SO",   "Silurian-Ordovician",                                           Some(Limestone)),
    ("TKi",  "Acidic intrusive rocks Cretaceous, Paleogene and Neogene",      Some(Granite)),
    ("Tr",   "Triassic",                                                      Some(Sandstone)),
    ("TrP",  "Triassic and Permian",                                          Some(Sandstone)),
    ("X",    "Lower and Middle Proterozoic",                                  Some(Schist)),
    ("Y",    "Upper and Middle Proterozoic",                                  Some(Schist)),
    ("Z",    "Upper Proterozoic",                                             Some(Schist)),
    ("ii",   "Basic, Ultrabasic and Alkaline intrusive rocks of unknown age", Some(Granite)),
    ("pC",   "Precambrian (undivided)",                                       Some(Granite)),
    ("SEA",  "Ocean",                                                         None),
    ("oth",  "Other",                                                         None),
    ("Ice",  "Ice sheet",                                                     None),
    ("H2O",  "Water",                                                         None),
    ("Lakes and wide rivers",                    "", None),
    ("Arctic areas covered by Ice",              "", None),
    ("Sea and large lakes",                      "", None),
    ("Areas outside of the former Soviet Union", "", None),
];

/// Look up a map unit; `None` for keys not on the map legend.
pub fn lookup(key: &str) -> Option<GeologyUnit> {
    UNITS.iter().find(|(k, _, _)| *k == key).map(|&(key, name, rock_type)| GeologyUnit {
        key,
        long_name: (!name.is_empty()).then_some(name),
        rock_type,
    })
}

pub fn long_name(key: &str) -> Option<&'static str> {
    lookup(key).and_then(|u| u.long_name)
}

pub fn rock_type(key: &str) -> Option<RockType> {
    lookup(key).and_then(|u| u.rock_type)
}

/// Copy of `layer` with `long_name` and `rock_type` properties resolved from
/// `key_column` (empty strings where a unit has neither).
pub fn annotate_units(layer: &VectorLayer, key_column: &str) -> VectorLayer {
    let mut out = layer.clone();
    for feature in &mut out.features {
        let unit = feature.property(key_column).and_then(lookup);
        let name = unit.and_then(|u| u.long_name).unwrap_or_default();
        let rock = unit.and_then(|u| u.rock_type).map(RockType::name).unwrap_or_default();
        feature.properties.insert("long_name".into(), name.into());
        feature.properties.insert("rock_type".into(), rock.into());
    }
    out
}

/// Burn geology polygons into a rock-type raster ([`RockType::code`]).
///
/// Units without a rock type and unknown keys stay 0 (also the nodata
/// value). Where units overlap the higher code wins.
pub fn rasterize_geology(layer: &VectorLayer, key_column: &str, grid: &GridSpec) -> Result<Raster<i32>> {
    layer.ensure_crs(grid)?;
    let mut unknown = BTreeSet::new();
    let features: Vec<(MultiPolygon<f64>, i32)> = layer
        .features
        .iter()
        .filter_map(|f| {
            let key = f.property(key_column)?;
            match lookup(key) {
                Some(unit) => unit.rock_type.map(|r| (f.geometry.clone(), r.code())),
                None => {
                    unknown.insert(key.to_string());
                    None
                }
            }
        })
        .collect();
    if !unknown.is_empty() {
        warn!("geology keys not on the map legend, left unclassified: {unknown:?}");
    }
    Ok(rasterize_codes(&features, grid))
}
