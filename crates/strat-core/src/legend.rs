//! Display metadata attached to classified rasters.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rule::ClassCode;

/// 24-bit display color, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (case-insensitive, leading `#` required).
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Lower-case `#rrggbb`.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_array(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&s).ok_or_else(|| format!("`{s}` is not a #RRGGBB color"))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub code: ClassCode,
    pub name: String,
    /// Rendered description (template placeholders already substituted).
    pub description: String,
    pub color: Color,
}

/// Ordered class legend. Order follows rule priority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Legend {
    entries: Vec<LegendEntry>,
}

impl Legend {
    pub fn new(entries: Vec<LegendEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[LegendEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, code: ClassCode) -> Option<&LegendEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    pub fn contains(&self, code: ClassCode) -> bool {
        self.get(code).is_some()
    }

    pub fn codes(&self) -> Vec<ClassCode> {
        self.entries.iter().map(|e| e.code).collect()
    }

    /// One line per class, `" 3 = Bedrock (slope > 30°)"`.
    pub fn labels(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{: >2} = {}", e.code, e.description))
            .collect()
    }
}

impl<'a> IntoIterator for &'a Legend {
    type Item = &'a LegendEntry;
    type IntoIter = std::slice::Iter<'a, LegendEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_case_hex() {
        assert_eq!(Color::parse_hex("#FFFF4C"), Some(Color::rgb(255, 255, 76)));
        assert_eq!(Color::parse_hex("#485b73"), Some(Color::rgb(0x48, 0x5b, 0x73)));
        assert_eq!(Color::parse_hex("#485b73").unwrap().to_hex(), "#485b73");
    }

    #[test]
    fn rejects_malformed_hex() {
        for bad in ["", "FA0000", "#FA000", "#FA00000", "#GG0000", "#ééé"] {
            assert_eq!(Color::parse_hex(bad), None, "{bad}");
        }
    }

    #[test]
    fn color_serializes_as_string() {
        let json = serde_json::to_string(&Color::rgb(250, 0, 0)).unwrap();
        assert_eq!(json, "\"#fa0000\"");
        assert!(serde_json::from_str::<Color>("\"red\"").is_err());
    }

    #[test]
    fn labels_are_right_aligned_codes() {
        let legend = Legend::new(vec![
            LegendEntry {
                code: 1,
                name: "excluded".into(),
                description: "Excluded".into(),
                color: Color::rgb(250, 0, 0),
            },
            LegendEntry {
                code: 12,
                name: "other".into(),
                description: "Other".into(),
                color: Color::rgb(0, 0, 0),
            },
        ]);
        assert_eq!(legend.labels(), vec![" 1 = Excluded", "12 = Other"]);
        assert_eq!(legend.codes(), vec![1, 12]);
        assert!(legend.contains(12));
        assert!(!legend.contains(2));
    }
}
