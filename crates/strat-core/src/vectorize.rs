//! Raster → polygon conversion for classified rasters.
//!
//! Pixels are grouped into 4-connected components per class. Each component's
//! outline is traced along pixel edges, so polygon areas equal pixel areas
//! exactly. Pixels meeting only at a corner belong to separate components.
//! Inside one component a corner-only contact splits the outline there, so
//! rings never revisit a vertex; a hole may touch the exterior or another
//! hole at that single point.
//!
//! Lattice vertex `(col, row)` is the top-left corner of pixel `(row, col)`.
use std::collections::{HashMap, VecDeque};

use geo::{Area, Contains};
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use log::debug;
use serde::Serialize;

use crate::classified::ClassifiedRaster;
use crate::error::{Result, StratError};
use crate::grid::GridSpec;
use crate::mask::RasterMask;
use crate::rule::ClassCode;

pub const DEFAULT_MAX_CLASSES: usize = 20;

type Vertex = (i64, i64);
type Edge = (Vertex, Vertex);

/// Polygons of one class (dissolved) or of one connected component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassFeature {
    pub code: ClassCode,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct SpatialIndexBuilder {
    max_classes: usize,
    dissolve: bool,
}

impl Default for SpatialIndexBuilder {
    fn default() -> Self {
        Self {
            max_classes: DEFAULT_MAX_CLASSES,
            dissolve: true,
        }
    }
}

impl SpatialIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse rasters holding more distinct classes than this.
    pub fn max_classes(mut self, max_classes: usize) -> Self {
        self.max_classes = max_classes;
        self
    }

    /// `true`: one feature per class. `false`: one feature per connected component.
    pub fn dissolve(mut self, dissolve: bool) -> Self {
        self.dissolve = dissolve;
        self
    }

    /// Features in legend order, components in row-major order of their first pixel.
    pub fn raster_to_vector(&self, raster: &ClassifiedRaster) -> Result<Vec<ClassFeature>> {
        let classes = raster.classes_present();
        if classes.len() > self.max_classes {
            return Err(StratError::TooManyClasses {
                found: classes.len(),
                max: self.max_classes,
            });
        }

        let mut features = Vec::new();
        for code in classes {
            let name = raster
                .legend()
                .get(code)
                .map(|e| e.name.clone())
                .unwrap_or_default();
            let components = mask_to_polygons(&raster.class_mask(code));
            debug!("class {code} ({name}): {} component(s)", components.len());
            if self.dissolve {
                let polygons = components.into_iter().flat_map(|mp| mp.0).collect();
                features.push(ClassFeature {
                    code,
                    name,
                    geometry: MultiPolygon(polygons),
                });
            } else {
                features.extend(components.into_iter().map(|geometry| ClassFeature {
                    code,
                    name: name.clone(),
                    geometry,
                }));
            }
        }
        Ok(features)
    }
}

/// One multipolygon per 4-connected component of `true` pixels, in world
/// coordinates, exteriors counter-clockwise, holes clockwise.
pub fn mask_to_polygons(mask: &RasterMask) -> Vec<MultiPolygon<f64>> {
    let grid = mask.grid();
    let (labels, n) = label_components(mask);
    boundary_edges(&labels, grid, n)
        .into_iter()
        .map(|edges| component_polygons(&edges, grid))
        .collect()
}

// ── Components ──────────────────────────────────────────────────────────────

/// 4-connected labels, 1-based; 0 = background.
fn label_components(mask: &RasterMask) -> (Vec<u32>, usize) {
    let (rows, cols) = mask.shape();
    let mut labels = vec![0u32; rows * cols];
    let mut next = 0u32;
    let mut queue = VecDeque::new();

    for start in mask.true_indices() {
        if labels[start] != 0 {
            continue;
        }
        next += 1;
        labels[start] = next;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            let (r, c) = (i / cols, i % cols);
            let neighbours = [
                (r > 0).then(|| i - cols),
                (r + 1 < rows).then(|| i + cols),
                (c > 0).then(|| i - 1),
                (c + 1 < cols).then(|| i + 1),
            ];
            for j in neighbours.into_iter().flatten() {
                if labels[j] == 0 && mask.data()[j] {
                    labels[j] = next;
                    queue.push_back(j);
                }
            }
        }
    }
    (labels, next as usize)
}

/// Directed boundary edges per component, interior on the right when
/// walking with rows increasing downward.
fn boundary_edges(labels: &[u32], grid: &GridSpec, n: usize) -> Vec<Vec<Edge>> {
    let (rows, cols) = grid.shape();
    let mut out = vec![Vec::new(); n];
    let label_at = |r: i64, c: i64| -> u32 {
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            0
        } else {
            labels[r as usize * cols + c as usize]
        }
    };

    for (i, &l) in labels.iter().enumerate() {
        if l == 0 {
            continue;
        }
        let (r, c) = ((i / cols) as i64, (i % cols) as i64);
        let edges = &mut out[l as usize - 1];
        if label_at(r - 1, c) != l {
            edges.push(((c, r), (c + 1, r)));
        }
        if label_at(r, c + 1) != l {
            edges.push(((c + 1, r), (c + 1, r + 1)));
        }
        if label_at(r + 1, c) != l {
            edges.push(((c + 1, r + 1), (c, r + 1)));
        }
        if label_at(r, c - 1) != l {
            edges.push(((c, r + 1), (c, r)));
        }
    }
    out
}

// ── Ring tracing ────────────────────────────────────────────────────────────

fn direction(e: &Edge) -> (i64, i64) {
    (e.1 .0 - e.0 .0, e.1 .1 - e.0 .1)
}

fn cross(a: (i64, i64), b: (i64, i64)) -> i64 {
    a.0 * b.1 - a.1 * b.0
}

/// Closed rings as vertex lists (first vertex not repeated).
fn trace_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.0).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring = Vec::new();
        let mut e = start;
        loop {
            used[e] = true;
            ring.push(edges[e].0);
            let d_in = direction(&edges[e]);
            // At a corner-only contact two edges leave the vertex; take the
            // left turn (negative cross product with rows pointing down) so
            // the ring closes before passing through the vertex again.
            let next = outgoing
                .get(&edges[e].1)
                .and_then(|cands| cands.iter().copied().min_by_key(|&o| cross(d_in, direction(&edges[o]))));
            match next {
                Some(n) if n != start && !used[n] => e = n,
                _ => break,
            }
        }
        rings.push(ring);
    }
    rings
}

/// Drop vertices where the outline runs straight on.
fn drop_collinear(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    (0..n)
        .filter(|&i| {
            let p = ring[(i + n - 1) % n];
            let c = ring[i];
            let q = ring[(i + 1) % n];
            cross((c.0 - p.0, c.1 - p.1), (q.0 - c.0, q.1 - c.1)) != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the signed lattice area; positive for outer boundaries.
fn lattice_area2(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum()
}

/// World ring. Row flipping reverses orientation, so vertices are reversed
/// to keep exteriors counter-clockwise.
fn to_line_string(ring: &[Vertex], grid: &GridSpec) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = ring
        .iter()
        .rev()
        .map(|&(c, r)| {
            let (x, y) = grid.vertex_to_world(c, r);
            Coord { x, y }
        })
        .collect();
    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    LineString(coords)
}

/// Centre of a pixel lying inside a hole: half a pixel to the left of the
/// ring's first edge.
fn hole_probe(ring: &[Vertex], grid: &GridSpec) -> Point<f64> {
    let a = ring[0];
    let b = ring[1 % ring.len()];
    let (dx, dy) = ((b.0 - a.0) as f64, (b.1 - a.1) as f64);
    let col = a.0 as f64 + 0.5 * dx + 0.5 * dy;
    let row = a.1 as f64 + 0.5 * dy - 0.5 * dx;
    let t = grid.transform();
    Point::new(t.west + col * t.pixel_width, t.north - row * t.pixel_height)
}

fn component_polygons(edges: &[Edge], grid: &GridSpec) -> MultiPolygon<f64> {
    let mut exteriors: Vec<(Polygon<f64>, f64, Vec<LineString<f64>>)> = Vec::new();
    let mut holes: Vec<(Vec<Vertex>, Vec<Vertex>)> = Vec::new();

    for ring in trace_rings(edges) {
        let simple = drop_collinear(&ring);
        if lattice_area2(&ring) > 0 {
            let polygon = Polygon::new(to_line_string(&simple, grid), Vec::new());
            let area = polygon.unsigned_area();
            exteriors.push((polygon, area, Vec::new()));
        } else {
            holes.push((ring, simple));
        }
    }

    for (ring, simple) in holes {
        let probe = hole_probe(&ring, grid);
        let owner = exteriors
            .iter()
            .enumerate()
            .filter(|(_, (poly, _, _))| poly.contains(&probe))
            .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .or_else(|| exteriors.iter().enumerate().max_by(|a, b| a.1 .1.total_cmp(&b.1 .1)))
            .map(|(i, _)| i);
        if let Some(i) = owner {
            exteriors[i].2.push(to_line_string(&simple, grid));
        }
    }

    MultiPolygon(
        exteriors
            .into_iter()
            .map(|(poly, _, interiors)| {
                let (exterior, _) = poly.into_inner();
                Polygon::new(exterior, interiors)
            })
            .collect(),
    )
}
