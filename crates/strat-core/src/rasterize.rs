//! Polygon → raster burning.
//!
//! A pixel is burned when its footprint touches a polygon, boundary included
//! ("all touched"). Each feature is burned independently; the per-feature
//! results are merged with an associative, commutative operator (OR for
//! masks, max for integer codes) so the feature order never shows in the
//! output. With the `threading` feature the per-feature pass runs on rayon.
use geo::{BoundingRect, Intersects};
use geo_types::MultiPolygon;

use crate::grid::GridSpec;
use crate::mask::RasterMask;
use crate::raster::Raster;

/// Row-major indices of every pixel of `grid` touched by `geometry`.
pub(crate) fn touched_pixels(geometry: &MultiPolygon<f64>, grid: &GridSpec) -> Vec<usize> {
    let Some(bbox) = geometry.bounding_rect() else {
        return Vec::new();
    };
    let t = grid.transform();
    let rows = grid.rows() as i64;
    let cols = grid.cols() as i64;

    // Candidate window, padded by one pixel so boundary-touching pixels are tested.
    let c0 = ((bbox.min().x - t.west) / t.pixel_width).floor() as i64 - 1;
    let c1 = ((bbox.max().x - t.west) / t.pixel_width).floor() as i64 + 1;
    let r0 = ((t.north - bbox.max().y) / t.pixel_height).floor() as i64 - 1;
    let r1 = ((t.north - bbox.min().y) / t.pixel_height).floor() as i64 + 1;
    if c1 < 0 || r1 < 0 || c0 >= cols || r0 >= rows {
        return Vec::new();
    }

    let mut out = Vec::new();
    for r in r0.max(0)..=r1.min(rows - 1) {
        for c in c0.max(0)..=c1.min(cols - 1) {
            let (r, c) = (r as usize, c as usize);
            let footprint = grid.pixel_rect(r, c).to_polygon();
            if geometry.intersects(&footprint) {
                out.push(grid.index(r, c));
            }
        }
    }
    out
}

fn touched_per_feature<'a, I>(geometries: I, grid: &GridSpec) -> Vec<Vec<usize>>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    let geometries: Vec<&MultiPolygon<f64>> = geometries.into_iter().collect();

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        geometries.par_iter().map(|g| touched_pixels(g, grid)).collect()
    }
    #[cfg(not(feature = "threading"))]
    {
        geometries.iter().map(|g| touched_pixels(g, grid)).collect()
    }
}

/// Burn polygons into a boolean mask (OR merge). No geometries → all `false`.
pub fn rasterize_mask(geometries: &[MultiPolygon<f64>], grid: &GridSpec) -> RasterMask {
    let mut data = vec![false; grid.len()];
    for pixels in touched_per_feature(geometries, grid) {
        for i in pixels {
            data[i] = true;
        }
    }
    RasterMask::from_raw(grid, data)
}

/// Burn coded polygons into an integer raster.
///
/// Background and nodata are `0`; where features overlap the largest code
/// wins. Codes should be positive.
pub fn rasterize_codes(features: &[(MultiPolygon<f64>, i32)], grid: &GridSpec) -> Raster<i32> {
    let mut out = Raster::on_grid(grid, 0i32).with_nodata(0);
    let burned = touched_per_feature(features.iter().map(|(g, _)| g), grid);
    for (pixels, &(_, code)) in burned.iter().zip(features) {
        for &i in pixels {
            out.data[i] = out.data[i].max(code);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Crs, GeoTransform};
    use geo_types::{polygon, MultiPolygon, Polygon};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// 4×4 grid of 1 m pixels; pixel (r, c) covers x ∈ [c, c+1], y ∈ [3−r, 4−r].
    fn grid() -> GridSpec {
        GridSpec::new(Crs::epsg(32643), GeoTransform::new(0.0, 4.0, 1.0, 1.0), 4, 4).unwrap()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        let p: Polygon<f64> = polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ];
        MultiPolygon(vec![p])
    }

    #[test]
    fn empty_input_gives_empty_mask() {
        assert!(rasterize_mask(&[], &grid()).is_empty());
    }

    #[test]
    fn small_polygon_burns_its_pixel() {
        let m = rasterize_mask(&[square(1.2, 2.2, 1.8, 2.8)], &grid());
        assert_eq!(m.count(), 1);
        assert!(m.get(1, 1));
    }

    #[test]
    fn edge_touching_pixels_are_included() {
        // Shares its right edge with column 2 along x = 2.
        let m = rasterize_mask(&[square(1.2, 2.2, 2.0, 2.8)], &grid());
        assert!(m.get(1, 1));
        assert!(m.get(1, 2));
        assert_eq!(m.count(), 2);
    }

    #[test]
    fn polygon_outside_grid_burns_nothing() {
        let m = rasterize_mask(&[square(10.0, 10.0, 12.0, 12.0)], &grid());
        assert!(m.is_empty());
    }

    #[test]
    fn polygon_covering_grid_burns_everything() {
        let m = rasterize_mask(&[square(-5.0, -5.0, 9.0, 9.0)], &grid());
        assert!(m.is_full());
    }

    #[test]
    fn overlapping_codes_take_the_maximum() {
        let features = vec![
            (square(0.1, 2.1, 1.9, 3.9), 2),
            (square(1.1, 2.1, 2.9, 3.9), 4),
            (square(0.1, 0.1, 0.9, 0.9), 1),
        ];
        let r = rasterize_codes(&features, &grid());
        assert_eq!(r.get(0, 0), 2);
        assert_eq!(r.get(0, 1), 4);
        assert_eq!(r.get(0, 2), 4);
        assert_eq!(r.get(3, 0), 1);
        assert_eq!(r.get(3, 3), 0);
        assert!(r.is_nodata(r.get(3, 3)));
    }

    #[test]
    fn merged_result_matches_feature_by_feature_burn() {
        let mut rng = StdRng::seed_from_u64(7);
        let g = grid();
        let shapes: Vec<MultiPolygon<f64>> = (0..25)
            .map(|_| {
                let x: f64 = rng.gen_range(-1.0..4.5);
                let y: f64 = rng.gen_range(-1.0..4.5);
                square(x, y, x + rng.gen_range(0.05..1.5), y + rng.gen_range(0.05..1.5))
            })
            .collect();

        let merged = rasterize_mask(&shapes, &g);

        let mut expected = vec![false; g.len()];
        for s in &shapes {
            for i in touched_pixels(s, &g) {
                expected[i] = true;
            }
        }
        assert_eq!(merged.data(), expected.as_slice());

        let mut reversed = shapes.clone();
        reversed.reverse();
        assert_eq!(rasterize_mask(&reversed, &g), merged);
    }
}
