//! Input rasters from GeoTIFF or JSON, chosen by file extension.
//!
//! The JSON form is the serde form of `strat_core::Raster`; float rasters
//! may hold `null` for missing values (which is how NaN serializes).
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use strat_core::{Crs, GeoTransform, Raster};

use crate::geotiff;

fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

#[derive(Deserialize)]
struct FloatRasterJson {
    #[serde(deserialize_with = "null_as_nan_vec")]
    data: Vec<f32>,
    rows: usize,
    cols: usize,
    crs: Option<Crs>,
    transform: GeoTransform,
    #[serde(default)]
    nodata: Option<f32>,
}

impl From<FloatRasterJson> for Raster<f32> {
    fn from(j: FloatRasterJson) -> Self {
        Raster {
            data: j.data,
            rows: j.rows,
            cols: j.cols,
            crs: j.crs,
            transform: j.transform,
            nodata: j.nodata,
        }
    }
}

enum Format {
    GeoTiff,
    Json,
}

fn format_of(path: &Path) -> Result<Format> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "tif" | "tiff" => Ok(Format::GeoTiff),
        "json" => Ok(Format::Json),
        _ => bail!("{}: expected a .tif/.tiff or .json raster", path.display()),
    }
}

fn parse_float_json(text: &str) -> Result<Raster<f32>> {
    let raw: FloatRasterJson = serde_json::from_str(text)?;
    Ok(raw.into())
}

/// Elevation in metres.
pub fn read_dem(path: &Path) -> Result<Raster<f32>> {
    match format_of(path)? {
        Format::GeoTiff => geotiff::read_f32(path),
        Format::Json => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            parse_float_json(&text).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }
}

/// Integer class raster such as ESA WorldCover.
pub fn read_categorical(path: &Path) -> Result<Raster<i32>> {
    match format_of(path)? {
        Format::GeoTiff => geotiff::read_i32(path),
        Format::Json => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_values_become_nan() {
        let r = parse_float_json(
            r#"{"data":[1.5,null,3.0,4.0],"rows":2,"cols":2,"crs":"epsg:32643",
                "transform":{"west":0.0,"north":2.0,"pixel_width":1.0,"pixel_height":1.0}}"#,
        )
        .unwrap();
        assert!(r.get(0, 1).is_nan());
        assert_eq!(r.get(1, 1), 4.0);
        assert_eq!(r.crs, Some(Crs::epsg(32643)));
        assert_eq!(r.nodata, None);
    }

    #[test]
    fn nan_survives_a_write_read_cycle() {
        let mut r = Raster::new(1, 2, Some(Crs::epsg(32643)), GeoTransform::new(0.0, 1.0, 1.0, 1.0), 7.0f32);
        r.set(0, 0, f32::NAN);
        let back = parse_float_json(&serde_json::to_string(&r).unwrap()).unwrap();
        assert!(back.get(0, 0).is_nan());
        assert_eq!(back.get(0, 1), 7.0);
    }

    #[test]
    fn format_follows_extension() {
        assert!(matches!(format_of(Path::new("dem.TIF")), Ok(Format::GeoTiff)));
        assert!(matches!(format_of(Path::new("lc.json")), Ok(Format::Json)));
        assert!(format_of(Path::new("dem.nc")).is_err());
    }
}
