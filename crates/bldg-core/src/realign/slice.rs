use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::extent::Extent;
use crate::geometry;
use crate::grid::{CellIndex, Grid};
use crate::par;
use crate::shape::SettlementShape;

/// The part of one settlement inside one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub settlement_id: u64,
    pub cell: CellIndex,
    pub geometry: MultiPolygon<f64>,
}

/// Cut every settlement along the grid. Returns slices bucketed by flat cell
/// index, ordered by settlement within each cell.
pub fn slice_settlements(settlements: &[SettlementShape], grid: &Grid) -> Vec<Vec<Slice>> {
    let per_settlement: Vec<Vec<Slice>> = par::map_indexed(settlements, |_, s| {
        let Some(ext) = Extent::of(&s.geometry) else {
            return Vec::new();
        };
        grid.cells_overlapping(&ext)
            .into_iter()
            .filter_map(|cell| {
                let part = geometry::clip_to_extent(&s.geometry, &grid.cell_extent(cell));
                (!part.0.is_empty()).then(|| Slice { settlement_id: s.id, cell, geometry: part })
            })
            .collect()
    });

    let mut by_cell: Vec<Vec<Slice>> = vec![Vec::new(); grid.cell_count()];
    for slice in per_settlement.into_iter().flatten() {
        let idx = grid.flat(slice.cell);
        by_cell[idx].push(slice);
    }
    by_cell
}
