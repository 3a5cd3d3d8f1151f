//! Dense-building contour polygons.
//!
//! Pixels of the building-count raster at or above `contour_value` are
//! grouped into 4-connected components with a flood fill; each component is
//! vectorised as the union of its pixel squares (row runs merged first), so
//! enclosed sparse pixels become holes.

use bitvec::prelude::*;
use geo::{Coord, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use crate::geometry::{self, Units};
use crate::raster::Raster;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourPolygon {
    pub id: u32,
    pub geometry: MultiPolygon<f64>,
    pub area_m2: f64,
    pub pixel_count: u32,
}

/// Flat pixel indices of each 4-connected component of dense pixels, in
/// row-major order of their first pixel.
pub fn dense_components(counts: &Raster<u32>, threshold: u32) -> Vec<Vec<usize>> {
    let cols = counts.spec.num_cols as usize;
    let rows = counts.spec.num_rows as usize;
    let dense = |i: usize| counts.data[i] >= threshold;

    let mut seen: BitVec = BitVec::repeat(false, cols * rows);
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start in 0..cols * rows {
        if seen[start] || !dense(start) {
            continue;
        }
        seen.set(start, true);
        stack.push(start);
        let mut members = Vec::new();
        while let Some(i) = stack.pop() {
            members.push(i);
            let (r, c) = (i / cols, i % cols);
            let mut visit = |j: usize| {
                if !seen[j] && dense(j) {
                    seen.set(j, true);
                    stack.push(j);
                }
            };
            if c > 0 {
                visit(i - 1);
            }
            if c + 1 < cols {
                visit(i + 1);
            }
            if r > 0 {
                visit(i - cols);
            }
            if r + 1 < rows {
                visit(i + cols);
            }
        }
        members.sort_unstable();
        components.push(members);
    }
    components
}

/// Vectorise every dense component.
pub fn dense_contours(counts: &Raster<u32>, threshold: u32, units: Units) -> Vec<ContourPolygon> {
    let spec = &counts.spec;
    let cols = spec.num_cols as usize;
    dense_components(counts, threshold)
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            // members are sorted, so consecutive indices on a row form runs
            let mut runs: Vec<MultiPolygon<f64>> = Vec::new();
            let mut k = 0;
            while k < members.len() {
                let (row, c0) = (members[k] / cols, members[k] % cols);
                let mut c1 = c0;
                while k + 1 < members.len() && members[k + 1] == members[k] + 1 && (members[k + 1] % cols) != 0 {
                    k += 1;
                    c1 += 1;
                }
                let rect = Rect::new(
                    Coord { x: spec.x_coord(c0 as i64), y: spec.y_coord(row as i64 + 1) },
                    Coord { x: spec.x_coord(c1 as i64 + 1), y: spec.y_coord(row as i64) },
                );
                runs.push(MultiPolygon::new(vec![rect.to_polygon()]));
                k += 1;
            }
            let geometry = geometry::union_all(runs);
            ContourPolygon {
                id: id as u32,
                area_m2: units.area_m2(&geometry),
                pixel_count: members.len() as u32,
                geometry,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterSpec;
    use approx::assert_relative_eq;
    use geo::Area;

    fn raster(rows: &[&str]) -> Raster<u32> {
        let spec = RasterSpec::new(0.0, rows.len() as f64 * 10.0, 10.0, -10.0, rows[0].len() as u32, rows.len() as u32).unwrap();
        let data = rows
            .iter()
            .flat_map(|r| r.chars().map(|ch| if ch == '#' { 20 } else { 1 }))
            .collect();
        Raster { spec, data }
    }

    #[test]
    fn four_connectivity_splits_diagonals() {
        let r = raster(&["#..", ".#.", "..#"]);
        assert_eq!(dense_components(&r, 13).len(), 3);
        let r = raster(&["##.", ".#.", ".##"]);
        assert_eq!(dense_components(&r, 13).len(), 1);
    }

    #[test]
    fn ring_of_dense_pixels_keeps_hole() {
        let r = raster(&["###", "#.#", "###"]);
        let contours = dense_contours(&r, 13, Units::Metres);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert_eq!(c.pixel_count, 8);
        assert_relative_eq!(c.area_m2, 800.0, epsilon = 1e-6);
        assert_eq!(c.geometry.0.len(), 1);
        assert_eq!(c.geometry.0[0].interiors().len(), 1);
        assert_relative_eq!(c.geometry.unsigned_area(), 800.0, epsilon = 1e-6);
    }

    #[test]
    fn runs_do_not_wrap_rows() {
        // last pixel of row 0 and first of row 1 are adjacent in memory only
        let r = raster(&["..#", "#.."]);
        let contours = dense_contours(&r, 13, Units::Metres);
        assert_eq!(contours.len(), 2);
        assert!(contours.iter().all(|c| (c.area_m2 - 100.0).abs() < 1e-6));
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut r = raster(&["..", ".."]);
        r.data[0] = 13;
        assert_eq!(dense_components(&r, 13), vec![vec![0]]);
        assert!(dense_components(&r, 14).is_empty());
    }
}
