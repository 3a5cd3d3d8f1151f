//! Spatial grid partitioner.
//!
//! Splits a working extent into `rows × cols` equal, non-overlapping cells.
//! Cells are the unit of chunked parallel work and of memory bounding.
//! Row 0 is the northernmost row, like the reference raster.

use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettleError};
use crate::extent::Extent;
use crate::raster::RasterSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub row: u32,
    pub col: u32,
}

impl CellIndex {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub extent: Extent,
    pub rows: u32,
    pub cols: u32,
    pub cell_width: f64,
    pub cell_height: f64,
}

impl Grid {
    /// Partition `extent` into `rows × cols` cells.
    pub fn new(extent: Extent, rows: u32, cols: u32) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(SettleError::config(format!("grid needs at least one row and column, got {rows} x {cols}")));
        }
        if !extent.is_finite() || extent.is_degenerate() {
            return Err(SettleError::config(format!("grid extent is degenerate: {extent:?}")));
        }
        Ok(Self {
            extent,
            rows,
            cols,
            cell_width: extent.width() / cols as f64,
            cell_height: extent.height() / rows as f64,
        })
    }

    /// Partition a raster so that every cell is a whole number of pixels
    /// wide and tall; the last row/column may run past the raster edge.
    pub fn aligned_to(spec: &RasterSpec, rows: u32, cols: u32) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(SettleError::config(format!("grid needs at least one row and column, got {rows} x {cols}")));
        }
        spec.validate()?;
        let pixels_per_col = spec.num_cols.div_ceil(cols);
        let pixels_per_row = spec.num_rows.div_ceil(rows);
        let cell_width = spec.pixel_width * pixels_per_col as f64;
        let cell_height = -spec.pixel_height * pixels_per_row as f64;
        let extent = Extent::new(
            spec.origin_x,
            spec.origin_y - cell_height * rows as f64,
            spec.origin_x + cell_width * cols as f64,
            spec.origin_y,
        );
        Ok(Self { extent, rows, cols, cell_width, cell_height })
    }

    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Row-major flat index, used for artifact naming.
    pub fn flat(&self, cell: CellIndex) -> usize {
        cell.row as usize * self.cols as usize + cell.col as usize
    }

    pub fn from_flat(&self, idx: usize) -> CellIndex {
        CellIndex::new((idx / self.cols as usize) as u32, (idx % self.cols as usize) as u32)
    }

    pub fn cells(&self) -> impl Iterator<Item = CellIndex> + '_ {
        (0..self.cell_count()).map(move |i| self.from_flat(i))
    }

    /// Cell containing `p`. Points on the far east/south edge belong to the
    /// last column/row; points outside the grid have no cell.
    pub fn cell_of(&self, p: Coord<f64>) -> Option<CellIndex> {
        if !self.extent.contains(p) {
            return None;
        }
        let col = ((p.x - self.extent.min_x) / self.cell_width).floor() as i64;
        let row = ((self.extent.max_y - p.y) / self.cell_height).floor() as i64;
        let col = col.clamp(0, self.cols as i64 - 1) as u32;
        let row = row.clamp(0, self.rows as i64 - 1) as u32;
        Some(CellIndex::new(row, col))
    }

    pub fn cell_extent(&self, cell: CellIndex) -> Extent {
        let min_x = self.extent.min_x + self.cell_width * cell.col as f64;
        let max_y = self.extent.max_y - self.cell_height * cell.row as f64;
        Extent::new(min_x, max_y - self.cell_height, min_x + self.cell_width, max_y)
    }

    pub fn cell_rect(&self, cell: CellIndex) -> Rect<f64> {
        self.cell_extent(cell).to_rect()
    }

    /// Cells whose extent intersects `extent`, in row-major order.
    pub fn cells_overlapping(&self, extent: &Extent) -> Vec<CellIndex> {
        if !self.extent.intersects(extent) {
            return Vec::new();
        }
        let c0 = ((extent.min_x - self.extent.min_x) / self.cell_width).floor().max(0.0) as u32;
        let c1 = (((extent.max_x - self.extent.min_x) / self.cell_width).floor() as i64).clamp(0, self.cols as i64 - 1) as u32;
        let r0 = ((self.extent.max_y - extent.max_y) / self.cell_height).floor().max(0.0) as u32;
        let r1 = (((self.extent.max_y - extent.min_y) / self.cell_height).floor() as i64).clamp(0, self.rows as i64 - 1) as u32;
        let mut out = Vec::new();
        for row in r0..=r1.max(r0) {
            for col in c0..=c1.max(c0) {
                if row < self.rows && col < self.cols {
                    out.push(CellIndex::new(row, col));
                }
            }
        }
        out
    }

    /// The cell itself plus its (up to 8) neighbours.
    pub fn neighbourhood(&self, cell: CellIndex) -> Vec<CellIndex> {
        let mut out = Vec::with_capacity(9);
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let r = cell.row as i64 + dr;
                let c = cell.col as i64 + dc;
                if r >= 0 && c >= 0 && r < self.rows as i64 && c < self.cols as i64 {
                    out.push(CellIndex::new(r as u32, c as u32));
                }
            }
        }
        out
    }

    /// Zero-padded artifact name, e.g. `cell_007` for a 10×10 grid.
    pub fn cell_name(&self, cell: CellIndex) -> String {
        let width = (self.cell_count().saturating_sub(1)).to_string().len();
        format!("cell_{:0width$}", self.flat(cell), width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_configuration() {
        let e = Extent::new(0.0, 0.0, 10.0, 10.0);
        assert!(matches!(Grid::new(e, 0, 3), Err(SettleError::Config(_))));
        assert!(matches!(Grid::new(e, 3, 0), Err(SettleError::Config(_))));
        let flat = Extent::new(0.0, 0.0, 10.0, 0.0);
        assert!(matches!(Grid::new(flat, 2, 2), Err(SettleError::Config(_))));
    }

    #[test]
    fn cells_partition_the_extent() {
        let g = Grid::new(Extent::new(0.0, 0.0, 10.0, 6.0), 3, 5).unwrap();
        assert_eq!(g.cell_count(), 15);
        let total: f64 = g.cells().map(|c| {
            let e = g.cell_extent(c);
            e.width() * e.height()
        }).sum();
        assert!((total - 60.0).abs() < 1e-9);

        // every sample point lands in exactly one cell, and inside its extent
        for i in 0..=20 {
            for j in 0..=12 {
                let p = Coord { x: i as f64 * 0.5, y: j as f64 * 0.5 };
                let cell = g.cell_of(p).unwrap();
                assert!(g.cell_extent(cell).contains(p), "{p:?} not in {cell:?}");
            }
        }
        assert_eq!(g.cell_of(Coord { x: 10.5, y: 1.0 }), None);
    }

    #[test]
    fn row_zero_is_north() {
        let g = Grid::new(Extent::new(0.0, 0.0, 10.0, 10.0), 2, 2).unwrap();
        assert_eq!(g.cell_of(Coord { x: 1.0, y: 9.0 }), Some(CellIndex::new(0, 0)));
        assert_eq!(g.cell_of(Coord { x: 9.0, y: 1.0 }), Some(CellIndex::new(1, 1)));
    }

    #[test]
    fn aligned_grid_cells_are_whole_pixels() {
        let spec = RasterSpec::new(0.0, 10.0, 0.5, -0.5, 21, 20).unwrap();
        let g = Grid::aligned_to(&spec, 4, 4).unwrap();
        // ceil(21 / 4) = 6 pixels of 0.5
        assert!((g.cell_width - 3.0).abs() < 1e-12);
        assert!((g.cell_height - 2.5).abs() < 1e-12);
        assert!(g.extent.max_x >= spec.right_x());
        assert!(g.extent.min_y <= spec.bottom_y());
        let c = g.cell_extent(CellIndex::new(1, 2));
        let pixels = c.width() / spec.pixel_width;
        assert!((pixels - pixels.round()).abs() < 1e-9);
    }

    #[test]
    fn overlapping_cells_and_neighbourhood() {
        let g = Grid::new(Extent::new(0.0, 0.0, 10.0, 10.0), 5, 5).unwrap();
        let cells = g.cells_overlapping(&Extent::new(1.0, 1.0, 3.0, 3.0));
        assert_eq!(cells.len(), 4);
        assert!(cells.contains(&CellIndex::new(4, 0)));
        assert!(cells.contains(&CellIndex::new(3, 1)));
        assert_eq!(g.neighbourhood(CellIndex::new(0, 0)).len(), 4);
        assert_eq!(g.neighbourhood(CellIndex::new(2, 2)).len(), 9);
        assert_eq!(g.cell_name(CellIndex::new(0, 7)), "cell_07");
    }
}
