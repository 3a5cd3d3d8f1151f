//! Run configuration.
//!
//! Loaded from a JSON file; every key is optional and falls back to the
//! defaults below. Validation happens once, before any stage runs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettleError};
use crate::geometry::Units;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working coordinate system of footprints and reference raster.
    pub units: Units,
    /// Extent-gap threshold for grouping, in coordinate units (degrees are
    /// used as-is, so the metric size varies with latitude).
    pub group_distance: f64,
    pub buffer_meters: f64,
    /// Holes below this area are filled. `None` fills every hole.
    pub hole_fill_max_area_m2: Option<f64>,
    pub chunk_rows: u32,
    pub chunk_cols: u32,
    /// Building count per pixel at or above which a pixel is "dense".
    pub contour_value: u32,
    /// Minimum contour polygon area (m²) that promotes to BUA.
    pub contour_min_area: f64,
    pub bua_min_buildings: u64,
    pub ssa_min_buildings: u64,
    /// Rasterization counts any touched pixel, not just covered centers.
    pub all_touched: bool,
    /// How far (in pixels) realignment searches for a settlement boundary.
    pub corner_search_pixels: f64,
    /// Recompute every stage even if its artifacts exist.
    pub clean: bool,
    /// Worker pool size; `None` uses all available cores.
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            units: Units::Degrees,
            group_distance: 0.000833,
            buffer_meters: 50.0,
            hole_fill_max_area_m2: None,
            chunk_rows: 10,
            chunk_cols: 10,
            contour_value: 13,
            contour_min_area: 400_000.0,
            bua_min_buildings: 3000,
            ssa_min_buildings: 50,
            all_touched: false,
            corner_search_pixels: 1.5,
            clean: false,
            workers: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_rows == 0 || self.chunk_cols == 0 {
            return Err(SettleError::config(format!(
                "chunk_rows and chunk_cols must be positive, got {} x {}",
                self.chunk_rows, self.chunk_cols
            )));
        }
        for (name, v) in [
            ("group_distance", self.group_distance),
            ("buffer_meters", self.buffer_meters),
            ("contour_min_area", self.contour_min_area),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(SettleError::config(format!("{name} must be a finite, non-negative number, got {v}")));
            }
        }
        if let Some(cutoff) = self.hole_fill_max_area_m2 {
            if !cutoff.is_finite() || cutoff < 0.0 {
                return Err(SettleError::config(format!("hole_fill_max_area_m2 must be non-negative, got {cutoff}")));
            }
        }
        if !(self.corner_search_pixels.is_finite() && self.corner_search_pixels > 0.0) {
            return Err(SettleError::config("corner_search_pixels must be positive"));
        }
        if self.contour_value == 0 {
            return Err(SettleError::config("contour_value must be at least 1"));
        }
        if self.ssa_min_buildings >= self.bua_min_buildings {
            return Err(SettleError::config(format!(
                "ssa_min_buildings ({}) must be below bua_min_buildings ({})",
                self.ssa_min_buildings, self.bua_min_buildings
            )));
        }
        if self.workers == Some(0) {
            return Err(SettleError::config("workers must be at least 1"));
        }
        Ok(())
    }
}

/// Read and validate a JSON configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| SettleError::config(format!("failed to read config {}: {e}", path.display())))?;
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| SettleError::config(format!("failed to parse config {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
