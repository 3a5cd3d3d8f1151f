//! Cross-cell dissolve.
//!
//! Shapes built independently per cell may overlap across cell boundaries.
//! Every pair whose extents overlap is tested for true intersection; the
//! connected components are unioned into one shape each and renumbered with
//! a stable `orig_fid` in order of their first input shape.

use geo::{Intersects, MultiPolygon};

use crate::error::SettleError;
use crate::extent::{index_extents, Extent};
use crate::geometry;
use crate::par;
use crate::shape::SettlementShape;
use crate::union_find::UnionFind;

#[derive(Debug, Default)]
pub struct DissolveOutcome {
    pub shapes: Vec<SettlementShape>,
    pub failures: Vec<SettleError>,
}

pub fn dissolve(shapes: Vec<SettlementShape>) -> DissolveOutcome {
    let extents: Vec<Extent> = shapes
        .iter()
        .map(|s| Extent::of(&s.geometry).unwrap_or_else(Extent::empty))
        .collect();
    let tree = index_extents(extents.iter().copied());
    let mut uf = UnionFind::new(shapes.len());
    for (i, e) in extents.iter().enumerate() {
        for hit in tree.locate_in_envelope_intersecting(&e.to_aabb()) {
            let j = hit.idx as usize;
            if j > i && shapes[i].geometry.intersects(&shapes[j].geometry) {
                uf.union(i as u32, j as u32);
            }
        }
    }

    let components = uf.components();
    let merged = par::map_indexed(&components, |fid, members| {
        let building_count = members.iter().map(|&m| shapes[m as usize].building_count).sum();
        let geometry = if members.len() == 1 {
            Ok(shapes[members[0] as usize].geometry.clone())
        } else {
            let parts: Vec<MultiPolygon<f64>> = members.iter().map(|&m| shapes[m as usize].geometry.clone()).collect();
            geometry::ensure_valid(geometry::union_all(parts), format!("dissolved shape {fid}"))
        };
        geometry.map(|geometry| SettlementShape { id: fid as u64, geometry, building_count })
    });

    let mut out = DissolveOutcome::default();
    for r in merged {
        match r {
            Ok(s) => out.shapes.push(s),
            Err(e) => out.failures.push(e),
        }
    }
    // keep orig_fid dense after failures
    for (fid, s) in out.shapes.iter_mut().enumerate() {
        s.id = fid as u64;
    }
    log::info!("dissolve: {} shapes -> {}", shapes.len(), out.shapes.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{polygon, Area};

    fn sq(id: u64, x: f64, y: f64, s: f64, n: u64) -> SettlementShape {
        SettlementShape {
            id,
            geometry: MultiPolygon::new(vec![polygon![
                (x: x, y: y), (x: x + s, y: y), (x: x + s, y: y + s), (x: x, y: y + s), (x: x, y: y)
            ]]),
            building_count: n,
        }
    }

    #[test]
    fn overlapping_and_touching_shapes_merge() {
        let out = dissolve(vec![
            sq(10, 0.0, 0.0, 2.0, 3),
            sq(11, 20.0, 0.0, 1.0, 1),
            sq(12, 1.0, 1.0, 2.0, 4),
            sq(13, 21.0, 0.0, 1.0, 2),
            sq(14, 50.0, 50.0, 1.0, 5),
        ]);
        assert!(out.failures.is_empty());
        assert_eq!(out.shapes.len(), 3);
        let ids: Vec<u64> = out.shapes.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(out.shapes[0].building_count, 7);
        assert_relative_eq!(out.shapes[0].geometry.unsigned_area(), 7.0, epsilon = 1e-9);
        assert_eq!(out.shapes[1].building_count, 3);
        assert_eq!(out.shapes[2].building_count, 5);
    }

    #[test]
    fn extent_overlap_alone_does_not_merge() {
        // L-shaped part whose extent covers the small square without touching it
        let l = SettlementShape {
            id: 0,
            geometry: MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 1.0), (x: 1.0, y: 1.0), (x: 1.0, y: 10.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)
            ]]),
            building_count: 1,
        };
        let out = dissolve(vec![l, sq(1, 5.0, 5.0, 1.0, 1)]);
        assert_eq!(out.shapes.len(), 2);
    }
}
