//! Grid realignment engine.
//!
//! After the cross-cell dissolve, every raster pixel keyed by a footprint
//! (the pixel holding the footprint's extent center, plus any pixel whose
//! center falls inside the footprint extent) must have its center inside the
//! settlement that covers the footprint, and so must the footprint's own
//! extent center. Settlements are first sliced along the grid to bound
//! vertex counts; each cell then checks its footprints against the slices of
//! its 3×3 neighbourhood and synthesizes a corner patch for every such point
//! left outside. Patches are unioned into their
//! settlements once, followed by a dissolve so that settlements bridged by a
//! patch merge.
//!
//! Must run exactly once, after the shape builder and the first dissolve.

pub mod corner;
pub mod slice;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use geo::{Coord, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

pub use corner::{corner_patch, Corner, CornerRecord, PatchTarget};
pub use slice::{slice_settlements, Slice};

use crate::dissolve::{dissolve, DissolveOutcome};
use crate::error::AlignmentWarning;
use crate::footprint::Footprint;
use crate::geometry;
use crate::raster::RasterSpec;
use crate::shape::SettlementShape;

/// Fraction of a pixel the patch apex is pushed back into the settlement.
const NUDGE_PIXELS: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealignParams {
    /// Largest allowed distance from a pixel center to the settlement
    /// boundary, in coordinate units.
    pub search_radius: f64,
    pub nudge: f64,
}

impl RealignParams {
    pub fn new(spec: &RasterSpec, corner_search_pixels: f64) -> Self {
        let pixel = spec.pixel_width.min(-spec.pixel_height);
        Self {
            search_radius: corner_search_pixels * pixel,
            nudge: NUDGE_PIXELS * pixel,
        }
    }
}

/// Corner patches and unresolved pixels found in one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellCorners {
    pub records: Vec<CornerRecord>,
    pub warnings: Vec<AlignmentWarning>,
}

/// Pixels keyed by a footprint, ascending by (row, col).
fn candidate_pixels(fp: &Footprint, spec: &RasterSpec) -> BTreeSet<(u32, u32)> {
    let ext = fp.extent();
    let mut out = BTreeSet::new();
    if let Some((col, row)) = spec.pixel_of(ext.center()) {
        out.insert((row, col));
    }
    if let Some((c0, r0, c1, r1)) = spec.window(&ext) {
        for row in r0..=r1 {
            for col in c0..=c1 {
                if ext.contains(spec.pixel_center(col as i64, row as i64)) {
                    out.insert((row, col));
                }
            }
        }
    }
    out
}

/// Settlement covering `p`: the lowest id among slices containing it, or
/// failing that the nearest slice boundary within `radius`.
fn owning_settlement(p: Coord<f64>, slices: &[&Slice], radius: f64) -> Option<u64> {
    if let Some(id) = slices
        .iter()
        .filter(|s| geometry::contains_coord(&s.geometry, p))
        .map(|s| s.settlement_id)
        .min()
    {
        return Some(id);
    }
    slices
        .iter()
        .filter_map(|s| geometry::nearest_boundary_point(&s.geometry, p).map(|(_, d)| (d, s.settlement_id)))
        .filter(|(d, _)| *d <= radius)
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, id)| id)
}

/// Check the footprints of one cell against the slices of its neighbourhood.
pub fn find_corners(footprints: &[Footprint], slices: &[&Slice], spec: &RasterSpec, params: &RealignParams) -> CellCorners {
    let mut out = CellCorners::default();
    let mut seen: HashSet<(u32, u32, u64)> = HashSet::new();

    for fp in footprints {
        let p = fp.center();
        let pixels = candidate_pixels(fp, spec);
        if pixels.is_empty() {
            out.warnings.push(AlignmentWarning {
                footprint_id: fp.id,
                raster_col: spec.col_of(p.x),
                raster_row: spec.row_of(p.y),
                reason: "outside reference raster".into(),
            });
            continue;
        }
        let Some(owner) = owning_settlement(p, slices, params.search_radius) else {
            for &(row, col) in &pixels {
                out.warnings.push(AlignmentWarning {
                    footprint_id: fp.id,
                    raster_col: col as i64,
                    raster_row: row as i64,
                    reason: "no settlement within search radius".into(),
                });
            }
            continue;
        };
        let own: Vec<&Slice> = slices.iter().filter(|s| s.settlement_id == owner).copied().collect();

        // the extent center itself may sit in a notch of an L or U shape
        if let Some((col, row)) = spec.pixel_of(p) {
            if !own.iter().any(|s| geometry::contains_coord(&s.geometry, p)) {
                match patch_towards(p, &own, params) {
                    Some((b, patch)) => out.records.push(CornerRecord {
                        settlement_id: owner,
                        footprint_id: fp.id,
                        raster_col: col,
                        raster_row: row,
                        target: PatchTarget::FootprintCenter,
                        center: p,
                        corner: Corner::from_offset(Coord { x: b.x - p.x, y: b.y - p.y }),
                        patch,
                    }),
                    None => out.warnings.push(AlignmentWarning {
                        footprint_id: fp.id,
                        raster_col: col as i64,
                        raster_row: row as i64,
                        reason: "footprint center beyond search radius".into(),
                    }),
                }
            }
        }

        for (row, col) in pixels {
            if !seen.insert((col, row, owner)) {
                continue;
            }
            let c = spec.pixel_center(col as i64, row as i64);
            if own.iter().any(|s| geometry::contains_coord(&s.geometry, c)) {
                continue;
            }
            match patch_towards(c, &own, params) {
                Some((b, patch)) => out.records.push(CornerRecord {
                    settlement_id: owner,
                    footprint_id: fp.id,
                    raster_col: col,
                    raster_row: row,
                    target: PatchTarget::PixelCenter,
                    center: c,
                    corner: Corner::from_offset(Coord { x: b.x - c.x, y: b.y - c.y }),
                    patch,
                }),
                None => out.warnings.push(AlignmentWarning {
                    footprint_id: fp.id,
                    raster_col: col as i64,
                    raster_row: row as i64,
                    reason: "settlement boundary beyond search radius".into(),
                }),
            }
        }
    }
    out
}

/// Corner patch anchored at the nearest boundary of `own` that brings
/// `target` inside, if that boundary is within the search radius.
fn patch_towards(target: Coord<f64>, own: &[&Slice], params: &RealignParams) -> Option<(Coord<f64>, Polygon<f64>)> {
    let (b, d) = own
        .iter()
        .filter_map(|s| geometry::nearest_boundary_point(&s.geometry, target))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    if d > params.search_radius {
        return None;
    }
    corner_patch(b, target, params.nudge).map(|patch| (b, patch))
}

/// Union every patch into its settlement, then dissolve so settlements
/// bridged by patches merge (building counts are summed).
pub fn apply_corners(shapes: Vec<SettlementShape>, records: &[CornerRecord]) -> DissolveOutcome {
    // pixel patches are shared by every footprint keying the pixel
    let mut patches: BTreeMap<u64, BTreeMap<(PatchTarget, u32, u32, u64), MultiPolygon<f64>>> = BTreeMap::new();
    for r in records {
        let footprint = match r.target {
            PatchTarget::PixelCenter => 0,
            PatchTarget::FootprintCenter => r.footprint_id,
        };
        patches
            .entry(r.settlement_id)
            .or_default()
            .entry((r.target, r.raster_row, r.raster_col, footprint))
            .or_insert_with(|| MultiPolygon::new(vec![r.patch.clone()]));
    }

    let mut failures = Vec::new();
    let patched: Vec<SettlementShape> = shapes
        .into_iter()
        .map(|s| {
            let Some(extra) = patches.remove(&s.id) else {
                return s;
            };
            let mut parts = Vec::with_capacity(extra.len() + 1);
            parts.push(s.geometry.clone());
            parts.extend(extra.into_values());
            match geometry::ensure_valid(geometry::union_all(parts), format!("settlement {}", s.id)) {
                Ok(geometry) => SettlementShape { geometry, ..s },
                Err(e) => {
                    log::warn!("corner patches for settlement {} dropped: {e}", s.id);
                    failures.push(e);
                    s
                }
            }
        })
        .collect();

    let mut out = dissolve(patched);
    out.failures.splice(0..0, failures);
    out
}

/// Pixels whose center still falls outside the settlement covering their
/// footprint. Empty once realignment has done its job.
pub fn misaligned(footprints: &[Footprint], settlements: &[SettlementShape], spec: &RasterSpec) -> Vec<AlignmentWarning> {
    let geoms: Vec<MultiPolygon<f64>> = settlements.iter().map(|s| s.geometry.clone()).collect();
    let centers: Vec<Coord<f64>> = footprints.iter().map(Footprint::center).collect();
    let mut out = Vec::new();
    for (fp, hits) in footprints.iter().zip(geometry::shapes_containing(&geoms, &centers)) {
        let Some(&owner) = hits.first() else {
            continue;
        };
        for (row, col) in candidate_pixels(fp, spec) {
            let c = spec.pixel_center(col as i64, row as i64);
            if !geometry::contains_coord(&geoms[owner as usize], c) {
                out.push(AlignmentWarning {
                    footprint_id: fp.id,
                    raster_col: col as i64,
                    raster_row: row as i64,
                    reason: "pixel center outside settlement".into(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Units;
    use crate::grid::Grid;
    use crate::grouping::group_footprints;
    use crate::shape::{build_shape, ShapeParams};
    use geo::polygon;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn rect(id: u64, x: f64, y: f64, w: f64, h: f64) -> Footprint {
        Footprint::new(id, polygon![(x: x, y: y), (x: x + w, y: y), (x: x + w, y: y + h), (x: x, y: y + h), (x: x, y: y)])
    }

    /// Group, buffer, dissolve, slice, patch, as the pipeline does.
    fn realign_all(fps: &[Footprint], grid: &Grid, spec: &RasterSpec, buffer: f64) -> (Vec<SettlementShape>, Vec<CornerRecord>, Vec<AlignmentWarning>) {
        let params = ShapeParams { buffer_meters: buffer, hole_cutoff_m2: None, units: Units::Metres };
        let groups = group_footprints(fps.to_vec(), 3.0, 0).groups;
        let shapes: Vec<SettlementShape> = groups.iter().map(|g| build_shape(g, &params).unwrap()).collect();
        let shapes = dissolve(shapes).shapes;
        let sliced = slice_settlements(&shapes, grid);
        let rp = RealignParams::new(spec, 1.5);

        let (cells, _) = crate::footprint::assign_to_cells(fps.to_vec(), grid);
        let mut records = Vec::new();
        let mut warnings = Vec::new();
        for cell in grid.cells() {
            let neighbourhood: Vec<&Slice> = grid
                .neighbourhood(cell)
                .into_iter()
                .flat_map(|n| sliced[grid.flat(n)].iter())
                .collect();
            let found = find_corners(&cells[grid.flat(cell)], &neighbourhood, spec, &rp);
            records.extend(found.records);
            warnings.extend(found.warnings);
        }
        let out = apply_corners(shapes, &records);
        assert!(out.failures.is_empty());
        (out.shapes, records, warnings)
    }

    #[test]
    fn single_building_gets_patched() {
        // 10 m pixels; a 2 × 2 building near the corner of pixel (0, 9)
        let spec = RasterSpec::new(0.0, 100.0, 10.0, -10.0, 10, 10).unwrap();
        let grid = Grid::aligned_to(&spec, 2, 2).unwrap();
        let fps = vec![rect(1, 0.5, 0.5, 2.0, 2.0)];
        let (shapes, records, warnings) = realign_all(&fps, &grid, &spec, 0.5);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].raster_col, records[0].raster_row), (0, 9));
        assert_eq!(records[0].corner, Corner::SouthWest);
        assert_eq!(shapes.len(), 1);
        assert!(geometry::contains_coord(&shapes[0].geometry, Coord { x: 5.0, y: 5.0 }));
        assert!(misaligned(&fps, &shapes, &spec).is_empty());
    }

    #[test]
    fn footprint_center_in_notch_gets_patched() {
        // U shape: the extent center (30, 30) lies in the notch, 8 m from the
        // buffered walls; the single 100 m pixel center (50, 50) is inside
        let spec = RasterSpec::new(0.0, 100.0, 100.0, -100.0, 1, 1).unwrap();
        let grid = Grid::aligned_to(&spec, 1, 1).unwrap();
        let u = Footprint::new(
            1,
            polygon![
                (x: 0.0, y: 0.0), (x: 60.0, y: 0.0), (x: 60.0, y: 60.0), (x: 40.0, y: 60.0),
                (x: 40.0, y: 20.0), (x: 20.0, y: 20.0), (x: 20.0, y: 60.0), (x: 0.0, y: 60.0), (x: 0.0, y: 0.0)
            ],
        );
        let p = Coord { x: 30.0, y: 30.0 };
        assert_eq!(u.center(), p);

        let (shapes, records, warnings) = realign_all(&[u.clone()], &grid, &spec, 2.0);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, PatchTarget::FootprintCenter);
        assert_eq!(records[0].center, p);
        assert_eq!(shapes.len(), 1);
        assert!(geometry::contains_coord(&shapes[0].geometry, p));
        assert!(misaligned(&[u], &shapes, &spec).is_empty());
    }

    #[test]
    fn already_aligned_needs_no_patch() {
        let spec = RasterSpec::new(0.0, 100.0, 10.0, -10.0, 10, 10).unwrap();
        let grid = Grid::aligned_to(&spec, 2, 2).unwrap();
        let fps = vec![rect(1, 4.0, 4.0, 2.0, 2.0)];
        let (_, records, warnings) = realign_all(&fps, &grid, &spec, 0.5);
        assert!(records.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn patches_can_bridge_settlements() {
        let spec = RasterSpec::new(0.0, 100.0, 10.0, -10.0, 10, 10).unwrap();
        let grid = Grid::aligned_to(&spec, 1, 1).unwrap();
        // two buildings either side of the center of pixel (2, 7), 6 m apart
        let fps = vec![rect(1, 21.0, 24.0, 1.0, 2.0), rect(2, 28.0, 24.0, 1.0, 2.0)];
        let (shapes, records, _) = realign_all(&fps, &grid, &spec, 0.5);
        assert!(!records.is_empty());
        assert_eq!(shapes.len(), 1, "patches should merge both settlements");
        assert_eq!(shapes[0].building_count, 2);
        assert!(misaligned(&fps, &shapes, &spec).is_empty());
    }

    #[test]
    fn unreachable_boundary_is_warning() {
        let spec = RasterSpec::new(0.0, 100.0, 10.0, -10.0, 10, 10).unwrap();
        let fp = rect(1, 0.5, 0.5, 2.0, 2.0);
        let slice = Slice {
            settlement_id: 0,
            cell: crate::grid::CellIndex::new(0, 0),
            geometry: MultiPolygon::new(vec![fp.geometry.clone()]),
        };
        // search radius of 1 m cannot reach the center at (5, 5)
        let rp = RealignParams { search_radius: 1.0, nudge: 0.1 };
        let found = find_corners(&[fp], &[&slice], &spec, &rp);
        assert!(found.records.is_empty());
        assert_eq!(found.warnings.len(), 1);
        assert_eq!((found.warnings[0].raster_col, found.warnings[0].raster_row), (0, 9));
    }

    #[test]
    fn alignment_holds_for_random_layouts() {
        let mut rng = StdRng::seed_from_u64(2024);
        for round in 0..4 {
            let spec = RasterSpec::new(0.0, 200.0, 10.0, -10.0, 20, 20).unwrap();
            let grid = Grid::aligned_to(&spec, 3, 3).unwrap();
            let fps: Vec<Footprint> = (0..60)
                .map(|i| {
                    let w = rng.gen_range(1.0..4.0);
                    let h = rng.gen_range(1.0..4.0);
                    rect(i, rng.gen_range(15.0..180.0), rng.gen_range(15.0..180.0), w, h)
                })
                .collect();
            let (shapes, _, warnings) = realign_all(&fps, &grid, &spec, 1.0);
            assert!(warnings.is_empty(), "round {round}: {warnings:?}");
            let bad = misaligned(&fps, &shapes, &spec);
            assert!(bad.is_empty(), "round {round}: {bad:?}");
            let total: u64 = shapes.iter().map(|s| s.building_count).sum();
            assert_eq!(total, fps.len() as u64);
        }
    }
}
