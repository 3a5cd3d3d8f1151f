//! Building footprints: ingestion, repair and assignment to grid cells.

use std::collections::HashSet;

use geo::{Area, Coord, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::SettleError;
use crate::extent::Extent;
use crate::geometry;
use crate::grid::Grid;

/// A single building polygon with its stable source identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub id: u64,
    pub geometry: Polygon<f64>,
}

impl Footprint {
    pub fn new(id: u64, geometry: Polygon<f64>) -> Self {
        Self { id, geometry }
    }

    pub fn extent(&self) -> Extent {
        Extent::of(&self.geometry).unwrap_or_else(Extent::empty)
    }

    /// Center of the extent: the point every containment rule is keyed on.
    pub fn center(&self) -> Coord<f64> {
        self.extent().center()
    }
}

/// On-disk footprint layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FootprintLayer {
    pub footprints: Vec<Footprint>,
}

/// Result of ingestion: usable footprints plus per-footprint rejections.
#[derive(Debug, Default)]
pub struct Ingested {
    pub footprints: Vec<Footprint>,
    pub rejected: Vec<(u64, SettleError)>,
    pub repaired: usize,
}

/// Validate every footprint, repairing invalid ones once. A repair that
/// splits a footprint keeps its largest part so the identifier stays unique.
pub fn ingest(raw: Vec<Footprint>) -> Ingested {
    let mut out = Ingested::default();
    let mut seen = HashSet::with_capacity(raw.len());
    for fp in raw {
        if !seen.insert(fp.id) {
            out.rejected.push((fp.id, SettleError::geometry(format!("footprint {}", fp.id), "duplicate identifier")));
            continue;
        }
        let shape = MultiPolygon::new(vec![fp.geometry.clone()]);
        if geometry::check_valid(&shape).is_ok() {
            out.footprints.push(fp);
            continue;
        }
        match geometry::ensure_valid(shape, format!("footprint {}", fp.id)) {
            Ok(fixed) => {
                let largest = fixed
                    .0
                    .into_iter()
                    .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()));
                if let Some(poly) = largest {
                    out.repaired += 1;
                    out.footprints.push(Footprint::new(fp.id, poly));
                }
            }
            Err(e) => out.rejected.push((fp.id, e)),
        }
    }
    if !out.rejected.is_empty() {
        log::warn!("{} footprints rejected during ingestion", out.rejected.len());
    }
    out
}

/// Footprints bucketed by the grid cell containing their extent center,
/// indexed by flat cell index. Footprints outside the grid are returned
/// separately.
pub fn assign_to_cells(footprints: Vec<Footprint>, grid: &Grid) -> (Vec<Vec<Footprint>>, Vec<Footprint>) {
    let mut cells: Vec<Vec<Footprint>> = vec![Vec::new(); grid.cell_count()];
    let mut outside = Vec::new();
    for fp in footprints {
        match grid.cell_of(fp.center()) {
            Some(cell) => cells[grid.flat(cell)].push(fp),
            None => outside.push(fp),
        }
    }
    (cells, outside)
}

/// Extent covering every footprint, `None` when there are none.
pub fn layer_extent(footprints: &[Footprint]) -> Option<Extent> {
    if footprints.is_empty() {
        return None;
    }
    Some(footprints.iter().fold(Extent::empty(), |acc, f| acc.union(&f.extent())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn unit_square(id: u64, x: f64, y: f64) -> Footprint {
        Footprint::new(
            id,
            polygon![(x: x, y: y), (x: x + 1.0, y: y), (x: x + 1.0, y: y + 1.0), (x: x, y: y + 1.0), (x: x, y: y)],
        )
    }

    #[test]
    fn ingestion_rejects_duplicates_and_collapsed() {
        let flat = Footprint::new(9, polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 0.0)]);
        let raw = vec![unit_square(1, 0.0, 0.0), unit_square(1, 5.0, 5.0), flat, unit_square(2, 3.0, 0.0)];
        let res = ingest(raw);
        let ids: Vec<u64> = res.footprints.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(res.rejected.len(), 2);
        assert!(res.rejected.iter().all(|(_, e)| e.kind() == "GeometryError"));
    }

    #[test]
    fn ingestion_repairs_non_finite_vertex() {
        let bad = Footprint::new(
            4,
            polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: f64::NAN, y: f64::NAN), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)],
        );
        let res = ingest(vec![bad, unit_square(5, 9.0, 9.0)]);
        assert_eq!(res.footprints.len(), 2);
        assert_eq!(res.repaired, 1);
        assert!((res.footprints[0].geometry.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn self_intersecting_footprint_is_never_kept_as_is() {
        let bowtie = Footprint::new(
            7,
            polygon![(x: 0.0, y: 0.0), (x: 3.0, y: 2.0), (x: 3.0, y: 0.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0)],
        );
        let res = ingest(vec![bowtie.clone(), unit_square(8, 9.0, 9.0)]);
        match res.footprints.iter().find(|f| f.id == 7) {
            Some(fixed) => {
                assert_eq!(res.repaired, 1);
                assert_ne!(fixed.geometry, bowtie.geometry);
                let shape = MultiPolygon::new(vec![fixed.geometry.clone()]);
                assert!(geometry::check_valid(&shape).is_ok(), "{:?}", geometry::check_valid(&shape));
                // largest of the two lobes
                assert!((fixed.geometry.unsigned_area() - 2.0).abs() < 1e-6);
            }
            None => {
                assert_eq!(res.rejected.len(), 1);
                assert_eq!(res.rejected[0].1.kind(), "GeometryError");
            }
        }
        assert!(res.footprints.iter().any(|f| f.id == 8));
    }

    #[test]
    fn assignment_uses_extent_center() {
        let grid = Grid::new(Extent::new(0.0, 0.0, 10.0, 10.0), 2, 2).unwrap();
        // straddles x = 5 but its center (5.2, 1.5) is in the east column
        let fps = vec![unit_square(1, 4.7, 1.0), unit_square(2, 1.0, 8.0), unit_square(3, 20.0, 20.0)];
        let (cells, outside) = assign_to_cells(fps, &grid);
        assert_eq!(cells[grid.flat(crate::grid::CellIndex::new(1, 1))][0].id, 1);
        assert_eq!(cells[0][0].id, 2);
        assert_eq!(outside.len(), 1);
        assert_eq!(cells.iter().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn layer_extent_covers_all() {
        let e = layer_extent(&[unit_square(1, 0.0, 0.0), unit_square(2, 4.0, -2.0)]).unwrap();
        assert_eq!(e, Extent::new(0.0, -2.0, 5.0, 1.0));
        assert!(layer_extent(&[]).is_none());
    }
}
