use geo::{Contains, Coord, Intersects, MultiPolygon, Point, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettleError};
use crate::extent::Extent;

/// Geotransform of a north-up, single-band raster.
///
/// Row 0 is the northernmost row, so `pixel_height` is negative, matching
/// the reference rasters this tool is fed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSpec {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Negative for north-up rasters.
    pub pixel_height: f64,
    pub num_cols: u32,
    pub num_rows: u32,
}

impl RasterSpec {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64, num_cols: u32, num_rows: u32) -> Result<Self> {
        let spec = Self { origin_x, origin_y, pixel_width, pixel_height, num_cols, num_rows };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pixel_width > 0.0) || !(self.pixel_height < 0.0) {
            return Err(SettleError::config(format!(
                "raster pixel size must be positive width / negative height, got {} x {}",
                self.pixel_width, self.pixel_height
            )));
        }
        if self.num_cols == 0 || self.num_rows == 0 {
            return Err(SettleError::config("raster has no pixels"));
        }
        if !self.origin_x.is_finite() || !self.origin_y.is_finite() {
            return Err(SettleError::config("raster origin is not finite"));
        }
        Ok(())
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.num_cols as usize * self.num_rows as usize
    }

    /// Left edge of column `col`.
    pub fn x_coord(&self, col: i64) -> f64 {
        self.origin_x + self.pixel_width * col as f64
    }

    /// Top edge of row `row`.
    pub fn y_coord(&self, row: i64) -> f64 {
        self.origin_y + self.pixel_height * row as f64
    }

    pub fn right_x(&self) -> f64 {
        self.x_coord(self.num_cols as i64)
    }

    pub fn bottom_y(&self) -> f64 {
        self.y_coord(self.num_rows as i64)
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.origin_x, self.bottom_y(), self.right_x(), self.origin_y)
    }

    /// Column containing `x`; may be outside `0..num_cols`.
    pub fn col_of(&self, x: f64) -> i64 {
        ((x - self.origin_x) / self.pixel_width).floor() as i64
    }

    /// Row containing `y`; may be outside `0..num_rows`.
    pub fn row_of(&self, y: f64) -> i64 {
        ((y - self.origin_y) / self.pixel_height).floor() as i64
    }

    /// (col, row) of the pixel containing `c`, or `None` outside the raster.
    pub fn pixel_of(&self, c: Coord<f64>) -> Option<(u32, u32)> {
        let col = self.col_of(c.x);
        let row = self.row_of(c.y);
        if col < 0 || row < 0 || col >= self.num_cols as i64 || row >= self.num_rows as i64 {
            return None;
        }
        Some((col as u32, row as u32))
    }

    #[inline]
    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.num_cols as usize + col as usize
    }

    pub fn pixel_center(&self, col: i64, row: i64) -> Coord<f64> {
        Coord {
            x: self.origin_x + self.pixel_width * (col as f64 + 0.5),
            y: self.origin_y + self.pixel_height * (row as f64 + 0.5),
        }
    }

    pub fn pixel_rect(&self, col: i64, row: i64) -> Rect<f64> {
        Rect::new(
            Coord { x: self.x_coord(col), y: self.y_coord(row + 1) },
            Coord { x: self.x_coord(col + 1), y: self.y_coord(row) },
        )
    }

    /// Inclusive (col, row) window covering `extent`, clamped to the raster.
    /// `None` when the extent misses the raster entirely.
    pub fn window(&self, extent: &Extent) -> Option<(u32, u32, u32, u32)> {
        let c0 = self.col_of(extent.min_x).max(0);
        let c1 = self.col_of(extent.max_x).min(self.num_cols as i64 - 1);
        let r0 = self.row_of(extent.max_y).max(0);
        let r1 = self.row_of(extent.min_y).min(self.num_rows as i64 - 1);
        if c0 > c1 || r0 > r1 {
            return None;
        }
        Some((c0 as u32, r0 as u32, c1 as u32, r1 as u32))
    }

    /// Grow the raster by whole pixels so it covers `extent` plus one empty
    /// pixel on every side. Origin alignment and pixel size are preserved.
    pub fn expanded_to(&self, extent: &Extent) -> Self {
        let target = Extent::new(
            extent.min_x - self.pixel_width,
            extent.min_y + self.pixel_height,
            extent.max_x + self.pixel_width,
            extent.max_y - self.pixel_height,
        );
        let mut out = self.clone();

        let left = self.col_of(target.min_x).min(0);
        let top = self.row_of(target.max_y).min(0);
        let right = (self.col_of(target.max_x) + 1).max(self.num_cols as i64);
        let bottom = (self.row_of(target.min_y) + 1).max(self.num_rows as i64);

        out.origin_x = self.x_coord(left);
        out.origin_y = self.y_coord(top);
        out.num_cols = (right - left) as u32;
        out.num_rows = (bottom - top) as u32;
        out
    }

    /// Pixels selected by a polygon: the pixel center must fall inside it,
    /// or with `all_touched` any contact with the pixel square counts.
    pub fn rasterize(&self, shape: &MultiPolygon<f64>, all_touched: bool) -> Vec<(u32, u32)> {
        let Some(ext) = Extent::of(shape) else {
            return Vec::new();
        };
        let Some((c0, r0, c1, r1)) = self.window(&ext) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for row in r0..=r1 {
            for col in c0..=c1 {
                let hit = if all_touched {
                    shape.intersects(&self.pixel_rect(col as i64, row as i64))
                } else {
                    shape.contains(&Point::from(self.pixel_center(col as i64, row as i64)))
                };
                if hit {
                    out.push((col, row));
                }
            }
        }
        out
    }
}

/// A single-band raster with row-major data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster<T> {
    pub spec: RasterSpec,
    pub data: Vec<T>,
}

impl<T: Copy + Default> Raster<T> {
    pub fn new(spec: RasterSpec) -> Self {
        let data = vec![T::default(); spec.pixel_count()];
        Self { spec, data }
    }

    #[inline]
    pub fn get(&self, col: u32, row: u32) -> T {
        self.data[self.spec.index(col, row)]
    }

    #[inline]
    pub fn set(&mut self, col: u32, row: u32, val: T) {
        let idx = self.spec.index(col, row);
        self.data[idx] = val;
    }
}

impl Raster<u32> {
    /// Count of points per pixel. Points outside the raster are ignored.
    pub fn count_points(spec: RasterSpec, points: impl IntoIterator<Item = Coord<f64>>) -> Self {
        let mut r = Self::new(spec);
        for p in points {
            if let Some((col, row)) = r.spec.pixel_of(p) {
                let idx = r.spec.index(col, row);
                r.data[idx] += 1;
            }
        }
        r
    }

    /// Zonal sum of this raster over the pixels a shape rasterizes to.
    pub fn zonal_sum(&self, shape: &MultiPolygon<f64>, all_touched: bool) -> u64 {
        self.spec
            .rasterize(shape, all_touched)
            .into_iter()
            .map(|(c, r)| self.get(c, r) as u64)
            .sum()
    }

    pub fn max_value(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }
}
