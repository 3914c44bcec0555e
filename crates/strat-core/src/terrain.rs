//! DEM conditioning and slope.
//!
//! Both operations work on `Raster<f32>` elevation in metres. Declared
//! nodata is treated as NaN throughout.
use crate::error::{Result, StratError};
use crate::raster::Raster;

/// Metres per degree of latitude.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Remove single-pixel spikes and soften the DEM before slope derivation.
///
/// Rolling 3×3 median followed by a rolling 3×3 mean, both centred. NaN
/// neighbours are skipped; a window needs one valid value, otherwise the
/// output pixel is NaN. Windows are truncated at the raster edge.
pub fn smooth_dem(dem: &Raster<f32>) -> Raster<f32> {
    let src = dem.nodata_to_nan();
    let median = rolling_3x3(&src, median_of);
    rolling_3x3(&median, mean_of)
}

fn rolling_3x3(src: &Raster<f32>, reduce: fn(&mut [f32]) -> f32) -> Raster<f32> {
    let mut out = src.clone();
    let (rows, cols) = src.shape();
    let mut window = Vec::with_capacity(9);
    for r in 0..rows {
        for c in 0..cols {
            window.clear();
            for rr in r.saturating_sub(1)..=(r + 1).min(rows - 1) {
                for cc in c.saturating_sub(1)..=(c + 1).min(cols - 1) {
                    let v = src.get(rr, cc);
                    if !v.is_nan() {
                        window.push(v);
                    }
                }
            }
            let v = if window.is_empty() { f32::NAN } else { reduce(&mut window) };
            out.set(r, c, v);
        }
    }
    out
}

fn median_of(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn mean_of(values: &mut [f32]) -> f32 {
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    (sum / values.len() as f64) as f32
}

/// Per-pixel slope in degrees, Horn (1981) 3×3 weighted gradient.
///
/// ```text
///   NW  N  NE
///   W   *  E
///   SW  S  SE
///
///   dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · Δx)
///   dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · Δy)
///   slope = atan(√(dz/dx² + dz/dy²))
/// ```
///
/// Edge pixels reuse the nearest in-grid neighbour, so every pixel receives a
/// value. The result is NaN wherever any of the nine cells is NaN or nodata.
///
/// Pixel sizes come from the geotransform; geographic CRSs are converted
/// from degrees with 111 320 m/° (× cos φ for longitude at the row centre).
pub fn slope_degrees(dem: &Raster<f32>) -> Result<Raster<f32>> {
    let Some(crs) = dem.crs.as_ref() else {
        return Err(StratError::grid("slope", "elevation raster has no CRS"));
    };
    if dem.data.len() != dem.rows * dem.cols {
        return Err(StratError::shape(
            "slope input",
            (dem.rows, dem.cols),
            (dem.data.len() / dem.cols.max(1), dem.cols),
        ));
    }
    let geographic = crs.is_geographic();
    let t = dem.transform;
    let src = dem.nodata_to_nan();
    let (rows, cols) = src.shape();
    let mut out = src.map(|_| f32::NAN);

    for r in 0..rows {
        let (dx, dy) = if geographic {
            let lat = t.north - (r as f64 + 0.5) * t.pixel_height;
            (
                t.pixel_width * METRES_PER_DEGREE * lat.to_radians().cos(),
                t.pixel_height * METRES_PER_DEGREE,
            )
        } else {
            (t.pixel_width, t.pixel_height)
        };
        let rn = r.saturating_sub(1);
        let rs = (r + 1).min(rows - 1);
        for c in 0..cols {
            let cw = c.saturating_sub(1);
            let ce = (c + 1).min(cols - 1);

            let nw = src.get(rn, cw) as f64;
            let n = src.get(rn, c) as f64;
            let ne = src.get(rn, ce) as f64;
            let w = src.get(r, cw) as f64;
            let centre = src.get(r, c) as f64;
            let e = src.get(r, ce) as f64;
            let sw = src.get(rs, cw) as f64;
            let s = src.get(rs, c) as f64;
            let se = src.get(rs, ce) as f64;
            if [nw, n, ne, w, centre, e, sw, s, se].iter().any(|v| v.is_nan()) {
                continue;
            }

            let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * dx);
            let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * dy);
            let slope = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees();
            out.set(r, c, slope as f32);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Crs, GeoTransform, GridSpec};
    use approx::assert_relative_eq;

    fn grid(rows: usize, cols: usize, size: f64) -> GridSpec {
        GridSpec::new(Crs::epsg(32643), GeoTransform::new(0.0, 1000.0, size, size), rows, cols).unwrap()
    }

    fn ramp(rows: usize, cols: usize, size: f64, rise_per_col: f32) -> Raster<f32> {
        let g = grid(rows, cols, size);
        let data = (0..rows * cols).map(|i| (i % cols) as f32 * rise_per_col).collect();
        Raster::from_grid_data(&g, data).unwrap()
    }

    #[test]
    fn flat_dem_has_zero_slope() {
        let dem = Raster::on_grid(&grid(5, 5, 30.0), 1200.0f32);
        let slope = slope_degrees(&dem).unwrap();
        assert!(slope.data.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn interior_ramp_slope_matches_rise_over_run() {
        // 30 m rise per 30 m pixel → 45°.
        let slope = slope_degrees(&ramp(5, 5, 30.0, 30.0)).unwrap();
        for r in 0..5 {
            for c in 1..4 {
                assert_relative_eq!(slope.get(r, c), 45.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn edges_get_a_value() {
        let slope = slope_degrees(&ramp(4, 4, 10.0, 1.0)).unwrap();
        assert!(slope.data.iter().all(|s| !s.is_nan()));
        // Clamped neighbours halve the difference on the first column.
        assert!(slope.get(0, 0) < slope.get(0, 1));
    }

    #[test]
    fn nan_poisons_its_neighbourhood() {
        let mut dem = ramp(5, 5, 30.0, 3.0);
        dem.set(2, 2, f32::NAN);
        let slope = slope_degrees(&dem).unwrap();
        for r in 1..=3 {
            for c in 1..=3 {
                assert!(slope.get(r, c).is_nan());
            }
        }
        assert!(!slope.get(0, 0).is_nan());
        assert!(!slope.get(4, 4).is_nan());
    }

    #[test]
    fn geographic_pixels_are_converted_to_metres() {
        // 1/1000° pixels at the equator ≈ 111.32 m; rise of 111.32 m per column → 45°.
        let g = GridSpec::new(Crs::wgs84(), GeoTransform::new(0.0, 0.0025, 0.001, 0.001), 5, 5).unwrap();
        let data = (0..25).map(|i| (i % 5) as f32 * 111.32).collect();
        let dem = Raster::from_grid_data(&g, data).unwrap();
        let slope = slope_degrees(&dem).unwrap();
        assert_relative_eq!(slope.get(2, 2), 45.0, epsilon = 0.01);
    }

    #[test]
    fn slope_requires_crs() {
        let dem = Raster::new(3, 3, None, GeoTransform::new(0.0, 3.0, 1.0, 1.0), 0.0f32);
        assert!(slope_degrees(&dem).is_err());
    }

    #[test]
    fn smoothing_removes_a_spike() {
        let mut dem = Raster::on_grid(&grid(5, 5, 30.0), 100.0f32);
        dem.set(2, 2, 900.0);
        let smooth = smooth_dem(&dem);
        for &v in &smooth.data {
            assert_relative_eq!(v, 100.0);
        }
    }

    #[test]
    fn smoothing_skips_nan_but_keeps_all_nan_windows() {
        let nan = f32::NAN;
        let g = grid(1, 7, 30.0);
        let dem = Raster::from_grid_data(&g, vec![10.0f32, nan, nan, nan, nan, nan, 20.0]).unwrap();
        let smooth = smooth_dem(&dem);
        assert_relative_eq!(smooth.get(0, 0), 10.0);
        assert_relative_eq!(smooth.get(0, 1), 10.0);
        assert!(smooth.get(0, 3).is_nan());
        assert_relative_eq!(smooth.get(0, 6), 20.0);
    }

    #[test]
    fn smoothing_honours_declared_nodata() {
        let g = grid(1, 3, 30.0);
        let dem = Raster::from_grid_data(&g, vec![-9999.0f32, 50.0, 70.0]).unwrap().with_nodata(-9999.0);
        let smooth = smooth_dem(&dem);
        assert!(smooth.data.iter().all(|&v| v > 0.0));
        assert!(smooth.nodata.is_none());
    }
}
