//! ESA WorldCover v200 land cover classes.
use std::fmt;

use crate::legend::Color;
use crate::raster::Raster;

/// Land cover codes treated as outside the modelled domain (trees, cropland,
/// built-up, water, wetland, mangroves).
pub const EXCLUDED: &[i32] = &[10, 40, 50, 80, 90, 95];
/// Bare / sparse vegetation and snow / ice.
pub const BARE_GROUND: &[i32] = &[60, 70];
/// Shrubland and grassland.
pub const VEGETATED: &[i32] = &[20, 30];
pub const LICHEN_MOSS: &[i32] = &[100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandCoverClass {
    TreeCover,
    Shrubland,
    Grassland,
    Cropland,
    BuiltUp,
    BareSparse,
    SnowIce,
    Water,
    HerbaceousWetland,
    Mangroves,
    MossLichen,
}

impl LandCoverClass {
    pub const ALL: [LandCoverClass; 11] = [
        Self::TreeCover,
        Self::Shrubland,
        Self::Grassland,
        Self::Cropland,
        Self::BuiltUp,
        Self::BareSparse,
        Self::SnowIce,
        Self::Water,
        Self::HerbaceousWetland,
        Self::Mangroves,
        Self::MossLichen,
    ];

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn code(self) -> i32 {
        match self {
            Self::TreeCover => 10,
            Self::Shrubland => 20,
            Self::Grassland => 30,
            Self::Cropland => 40,
            Self::BuiltUp => 50,
            Self::BareSparse => 60,
            Self::SnowIce => 70,
            Self::Water => 80,
            Self::HerbaceousWetland => 90,
            Self::Mangroves => 95,
            Self::MossLichen => 100,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::TreeCover => "Tree cover",
            Self::Shrubland => "Shrubland",
            Self::Grassland => "Grassland",
            Self::Cropland => "Cropland",
            Self::BuiltUp => "Built-up",
            Self::BareSparse => "Bare / sparse vegetation",
            Self::SnowIce => "Snow and ice",
            Self::Water => "Permanent water bodies",
            Self::HerbaceousWetland => "Herbaceous wetland",
            Self::Mangroves => "Mangroves",
            Self::MossLichen => "Moss and lichen",
        }
    }

    /// Color hint published with the product.
    pub fn color(self) -> Color {
        match self {
            Self::TreeCover => Color::rgb(0x00, 0x64, 0x00),
            Self::Shrubland => Color::rgb(0xff, 0xbb, 0x22),
            Self::Grassland => Color::rgb(0xff, 0xff, 0x4c),
            Self::Cropland => Color::rgb(0xf0, 0x96, 0xff),
            Self::BuiltUp => Color::rgb(0xfa, 0x00, 0x00),
            Self::BareSparse => Color::rgb(0xb4, 0xb4, 0xb4),
            Self::SnowIce => Color::rgb(0xf0, 0xf0, 0xf0),
            Self::Water => Color::rgb(0x00, 0x64, 0xc8),
            Self::HerbaceousWetland => Color::rgb(0x00, 0x96, 0xa0),
            Self::Mangroves => Color::rgb(0x00, 0xcf, 0x75),
            Self::MossLichen => Color::rgb(0xfa, 0xe6, 0xa0),
        }
    }
}

impl fmt::Display for LandCoverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Distinct values that are neither a WorldCover class nor declared nodata, ascending.
pub fn unknown_codes(raster: &Raster<i32>) -> Vec<i32> {
    let mut unknown: Vec<i32> = raster
        .data
        .iter()
        .copied()
        .filter(|&v| !raster.is_nodata(v) && LandCoverClass::from_code(v).is_none())
        .collect();
    unknown.sort_unstable();
    unknown.dedup();
    unknown
}
