//! Grouping engine: single-linkage clustering of footprints by extent
//! proximity.
//!
//! Two footprints are linked when both the horizontal and the vertical gap
//! between their extents is at most `group_distance`; groups are the
//! connected components of that relation. Candidates come from an R-tree
//! query with the extent grown by the distance, components from a
//! disjoint-set, so the result is independent of processing order.

use serde::{Deserialize, Serialize};

use crate::error::SettleError;
use crate::extent::{index_extents, Extent};
use crate::footprint::Footprint;
use crate::union_find::UnionFind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Unique within a run: cell index in the high half, ordinal in the low.
    pub id: u64,
    pub extent: Extent,
    pub members: Vec<Footprint>,
}

pub fn group_id(cell_flat: usize, ordinal: usize) -> u64 {
    ((cell_flat as u64) << 32) | ordinal as u64
}

/// Output of grouping one cell.
#[derive(Debug, Default)]
pub struct GroupOutcome {
    pub groups: Vec<Group>,
    pub failures: Vec<(u64, SettleError)>,
}

/// Cluster the footprints of one cell.
///
/// If any footprint has no usable extent the index cannot be built, and every
/// footprint of the cell is reported as a geometry error instead of grouped.
pub fn group_footprints(footprints: Vec<Footprint>, distance: f64, cell_flat: usize) -> GroupOutcome {
    let extents: Vec<Extent> = footprints.iter().map(Footprint::extent).collect();
    if let Some(bad) = extents.iter().position(|e| !e.is_finite() || e.min_x > e.max_x || e.min_y > e.max_y) {
        let reason = format!("spatial index could not be built: footprint {} has no usable extent", footprints[bad].id);
        log::warn!("cell {cell_flat}: {reason}");
        let failures = footprints
            .iter()
            .map(|f| (f.id, SettleError::geometry(format!("footprint {}", f.id), reason.clone())))
            .collect();
        return GroupOutcome { groups: Vec::new(), failures };
    }

    let tree = index_extents(extents.iter().copied());
    let mut uf = UnionFind::new(footprints.len());
    for (i, e) in extents.iter().enumerate() {
        for hit in tree.locate_in_envelope_intersecting(&e.expand(distance).to_aabb()) {
            let j = hit.idx as usize;
            if j > i && e.is_near(&extents[j], distance) {
                uf.union(i as u32, j as u32);
            }
        }
    }

    let mut slots: Vec<Option<Footprint>> = footprints.into_iter().map(Some).collect();
    let groups: Vec<Group> = uf
        .components()
        .into_iter()
        .enumerate()
        .map(|(k, idx)| {
            let members: Vec<Footprint> = idx.iter().filter_map(|&m| slots[m as usize].take()).collect();
            let extent = members.iter().fold(Extent::empty(), |acc, f| acc.union(&f.extent()));
            Group { id: group_id(cell_flat, k), extent, members }
        })
        .collect();
    log::debug!("cell {cell_flat}: {} footprints -> {} groups", slots.len(), groups.len());
    GroupOutcome { groups, failures: Vec::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, LineString, Polygon};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::HashMap;

    fn rect(id: u64, x: f64, y: f64, w: f64, h: f64) -> Footprint {
        Footprint::new(id, polygon![(x: x, y: y), (x: x + w, y: y), (x: x + w, y: y + h), (x: x, y: y + h), (x: x, y: y)])
    }

    fn ids(g: &Group) -> Vec<u64> {
        g.members.iter().map(|f| f.id).collect()
    }

    #[test]
    fn chain_bridges_distant_pair() {
        // A-B gap 0.4 < 0.5 < A-C gap 1.8; B-C gap 0.4
        let fps = vec![rect(1, 0.0, 0.0, 1.0, 1.0), rect(2, 2.8, 0.0, 1.0, 1.0), rect(3, 1.4, 0.0, 1.0, 1.0)];
        let out = group_footprints(fps.clone(), 0.5, 0);
        assert_eq!(out.groups.len(), 1);
        assert_eq!(ids(&out.groups[0]), vec![1, 2, 3]);

        // without the bridge A and C stay apart
        let out = group_footprints(vec![fps[0].clone(), fps[1].clone()], 0.5, 0);
        assert_eq!(out.groups.len(), 2);
    }

    #[test]
    fn both_gaps_must_be_within_distance() {
        // x gap 0.2 but y gap 3.0
        let out = group_footprints(vec![rect(1, 0.0, 0.0, 1.0, 1.0), rect(2, 1.2, 4.0, 1.0, 1.0)], 0.5, 0);
        assert_eq!(out.groups.len(), 2);
    }

    #[test]
    fn groups_partition_input_and_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(11);
        let fps: Vec<Footprint> = (0..300)
            .map(|i| rect(i, rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0), rng.gen_range(0.2..2.0), rng.gen_range(0.2..2.0)))
            .collect();
        let d = 1.5;
        let out = group_footprints(fps.clone(), d, 3);
        assert!(out.failures.is_empty());

        let mut owner: HashMap<u64, u64> = HashMap::new();
        for g in &out.groups {
            for f in &g.members {
                assert!(owner.insert(f.id, g.id).is_none(), "footprint {} in two groups", f.id);
            }
        }
        assert_eq!(owner.len(), fps.len());

        for a in &fps {
            for b in &fps {
                if a.extent().is_near(&b.extent(), d) {
                    assert_eq!(owner[&a.id], owner[&b.id], "{} and {} are near but split", a.id, b.id);
                }
            }
        }
        assert!(out.groups.iter().all(|g| g.id >> 32 == 3));
    }

    #[test]
    fn order_does_not_change_grouping() {
        let mut rng = StdRng::seed_from_u64(5);
        let fps: Vec<Footprint> = (0..80)
            .map(|i| rect(i, rng.gen_range(0.0..20.0), rng.gen_range(0.0..20.0), 0.5, 0.5))
            .collect();
        let mut rev = fps.clone();
        rev.reverse();
        let as_sets = |out: GroupOutcome| {
            let mut v: Vec<Vec<u64>> = out
                .groups
                .iter()
                .map(|g| {
                    let mut m = ids(g);
                    m.sort_unstable();
                    m
                })
                .collect();
            v.sort();
            v
        };
        assert_eq!(as_sets(group_footprints(fps, 0.8, 0)), as_sets(group_footprints(rev, 0.8, 0)));
    }

    #[test]
    fn malformed_cell_reports_every_footprint() {
        let empty = Footprint::new(7, Polygon::new(LineString::new(vec![]), vec![]));
        let out = group_footprints(vec![rect(1, 0.0, 0.0, 1.0, 1.0), empty], 0.5, 0);
        assert!(out.groups.is_empty());
        let mut failed: Vec<u64> = out.failures.iter().map(|(id, _)| *id).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![1, 7]);
        assert!(out.failures.iter().all(|(_, e)| e.kind() == "GeometryError"));
    }
}
