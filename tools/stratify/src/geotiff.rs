//! Single-band GeoTIFF reading.
//!
//! Only north-up rasters georeferenced by ModelPixelScale + ModelTiepoint are
//! supported (what rioxarray / GDAL write by default). The EPSG code comes
//! from the GeoKey directory, nodata from the GDAL_NODATA ASCII tag.
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use strat_core::{Crs, GeoTransform, Raster};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

// ── GeoKeys ──────────────────────────────────────────────────────────────────

const GT_MODEL_TYPE: u16 = 1024;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// EPSG CRS declared in a GeoKey directory.
///
/// Directory layout: a 4-value header `[version, revision, minor, count]`
/// followed by `count` entries `[key, location, count, value]`. Only keys
/// stored inline (`location == 0`) are read. User-defined CRSs → `None`.
fn crs_from_geokeys(keys: &[u16]) -> Option<Crs> {
    let count = *keys.get(3)? as usize;
    let entries = keys.get(4..4 + 4 * count)?;

    let mut model_type = None;
    let mut geographic = None;
    let mut projected = None;
    for entry in entries.chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GT_MODEL_TYPE => model_type = Some(value),
            GEOGRAPHIC_TYPE => geographic = Some(value),
            PROJECTED_CS_TYPE => projected = Some(value),
            _ => {}
        }
    }

    let code = if model_type == Some(MODEL_TYPE_GEOGRAPHIC) {
        geographic
    } else {
        projected.or(geographic)
    }?;
    (code != USER_DEFINED).then(|| Crs::epsg(code as u32))
}

/// North-up transform from pixel scale `[sx, sy, sz]` and the first tiepoint
/// `[i, j, k, x, y, z]` (raster `(i, j)` ↦ model `(x, y)`).
fn transform_from_tags(scale: &[f64], tiepoint: &[f64]) -> Result<GeoTransform> {
    ensure!(scale.len() >= 2, "ModelPixelScale holds {} values", scale.len());
    ensure!(tiepoint.len() >= 6, "ModelTiepoint holds {} values", tiepoint.len());
    let (sx, sy) = (scale[0], scale[1]);
    ensure!(sx > 0.0 && sy > 0.0, "pixel scale must be positive, got ({sx}, {sy})");
    Ok(GeoTransform::new(
        tiepoint[3] - tiepoint[0] * sx,
        tiepoint[4] + tiepoint[1] * sy,
        sx,
        sy,
    ))
}

// ── Decoding ─────────────────────────────────────────────────────────────────

struct Band {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
    crs: Option<Crs>,
    transform: GeoTransform,
    nodata: Option<f64>,
}

fn samples_as_f64(img: DecodingResult) -> Option<Vec<f64>> {
    let v = match img {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => return None,
    };
    Some(v)
}

fn decode<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Band> {
    let (width, height) = decoder.dimensions().context("TIFF dimensions")?;
    let (rows, cols) = (height as usize, width as usize);

    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .context("missing ModelPixelScale tag")?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .context("missing ModelTiepoint tag")?;
    let transform = transform_from_tags(&scale, &tiepoint)?;

    let crs = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(value) => crs_from_geokeys(&value.into_u16_vec()?),
        None => None,
    };
    let nodata = match decoder.find_tag(Tag::GdalNodata)? {
        Some(value) => value.into_string().ok().and_then(|s| s.trim().parse().ok()),
        None => None,
    };

    let Some(values) = samples_as_f64(decoder.read_image().context("TIFF image data")?) else {
        bail!("unsupported TIFF sample format");
    };
    ensure!(
        values.len() == rows * cols,
        "expected one band ({} samples), found {}",
        rows * cols,
        values.len()
    );

    Ok(Band {
        rows,
        cols,
        values,
        crs,
        transform,
        nodata,
    })
}

fn read_band(path: &Path) -> Result<Band> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("{} is not a TIFF", path.display()))?;
    let band = decode(&mut decoder).with_context(|| format!("Failed to read {}", path.display()))?;
    if band.crs.is_none() {
        log::warn!("{} declares no EPSG CRS", path.display());
    }
    Ok(band)
}

/// Elevation-style raster; samples converted to `f32`.
pub fn read_f32(path: &Path) -> Result<Raster<f32>> {
    let band = read_band(path)?;
    Ok(Raster {
        data: band.values.iter().map(|&v| v as f32).collect(),
        rows: band.rows,
        cols: band.cols,
        crs: band.crs,
        transform: band.transform,
        nodata: band.nodata.map(|v| v as f32),
    })
}

/// Categorical raster; samples must be integral.
pub fn read_i32(path: &Path) -> Result<Raster<i32>> {
    let band = read_band(path)?;
    if let Some(v) = band.values.iter().find(|v| v.fract() != 0.0) {
        bail!("{} holds non-integer value {v}", path.display());
    }
    Ok(Raster {
        data: band.values.iter().map(|&v| v as i32).collect(),
        rows: band.rows,
        cols: band.cols,
        crs: band.crs,
        transform: band.transform,
        nodata: band.nodata.map(|v| v as i32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projected_crs_from_geokeys() {
        // GTModelType = projected, GTRasterType = area, ProjectedCSType = 32643.
        let keys = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 32643];
        assert_eq!(crs_from_geokeys(&keys), Some(Crs::epsg(32643)));
    }

    #[test]
    fn geographic_crs_from_geokeys() {
        let keys = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        assert_eq!(crs_from_geokeys(&keys), Some(Crs::wgs84()));
    }

    #[test]
    fn user_defined_and_truncated_directories_yield_none() {
        assert_eq!(crs_from_geokeys(&[1, 1, 0, 1, 3072, 0, 1, 32767]), None);
        assert_eq!(crs_from_geokeys(&[1, 1, 0, 2, 3072, 0, 1, 32643]), None);
        assert_eq!(crs_from_geokeys(&[]), None);
    }

    #[test]
    fn transform_from_corner_tiepoint() {
        let t = transform_from_tags(&[30.0, 30.0, 0.0], &[0.0, 0.0, 0.0, 500_000.0, 4_200_000.0, 0.0]).unwrap();
        assert_eq!(t, GeoTransform::new(500_000.0, 4_200_000.0, 30.0, 30.0));
    }

    #[test]
    fn transform_from_offset_tiepoint() {
        // Tiepoint anchored at raster (10, 20).
        let t = transform_from_tags(&[2.0, 3.0, 0.0], &[10.0, 20.0, 0.0, 120.0, 540.0, 0.0]).unwrap();
        assert_eq!(t, GeoTransform::new(100.0, 600.0, 2.0, 3.0));
    }

    #[test]
    fn rejects_bad_scale() {
        assert!(transform_from_tags(&[30.0], &[0.0; 6]).is_err());
        assert!(transform_from_tags(&[30.0, -30.0, 0.0], &[0.0; 6]).is_err());
    }
}
