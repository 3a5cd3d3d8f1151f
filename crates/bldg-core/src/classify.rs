//! Classification engine and post-run data-quality check.

use std::fmt;

use geo::{Coord, Intersects, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::contour::ContourPolygon;
use crate::extent::{index_extents, Extent};
use crate::footprint::Footprint;
use crate::geometry::{self, Units};
use crate::par;
use crate::raster::Raster;
use crate::shape::SettlementShape;

// ── Categories ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Built-up area.
    #[serde(rename = "BUA")]
    Bua,
    /// Small settlement area.
    #[serde(rename = "SSA")]
    Ssa,
    Hamlet,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Bua, Category::Ssa, Category::Hamlet];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Bua => "BUA",
            Category::Ssa => "SSA",
            Category::Hamlet => "Hamlet",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub bua_min_buildings: u64,
    pub ssa_min_buildings: u64,
    pub contour_min_area: f64,
}

impl From<&Config> for Thresholds {
    fn from(c: &Config) -> Self {
        Self {
            bua_min_buildings: c.bua_min_buildings,
            ssa_min_buildings: c.ssa_min_buildings,
            contour_min_area: c.contour_min_area,
        }
    }
}

/// First match wins: BUA by count or contour, then SSA, then Hamlet.
pub fn categorize(building_count: u64, contour_flag: bool, t: &Thresholds) -> Category {
    if building_count >= t.bua_min_buildings || contour_flag {
        Category::Bua
    } else if building_count >= t.ssa_min_buildings {
        Category::Ssa
    } else {
        Category::Hamlet
    }
}

// ── Settlements ───────────────────────────────────────────────────────────────

/// A classified settlement: one row of the output table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: u64,
    pub geometry: MultiPolygon<f64>,
    pub category: Category,
    pub building_count: u64,
    pub area_m2: f64,
    /// Intersects a contour polygon of at least `contour_min_area`.
    pub contour_flag: bool,
    /// Zonal sum of the building-count raster over the settlement.
    pub raster_building_count: u64,
    pub density_per_km2: f64,
}

/// Contour polygons large enough to promote a settlement.
fn qualifying<'a>(contours: &'a [ContourPolygon], min_area: f64) -> Vec<&'a ContourPolygon> {
    contours.iter().filter(|c| c.area_m2 >= min_area).collect()
}

pub struct ClassifyInputs<'a> {
    pub footprints: &'a [Footprint],
    pub contours: &'a [ContourPolygon],
    pub counts: &'a Raster<u32>,
    pub thresholds: Thresholds,
    pub units: Units,
    pub all_touched: bool,
}

pub fn classify(shapes: Vec<SettlementShape>, inputs: &ClassifyInputs<'_>) -> Vec<Settlement> {
    let geoms: Vec<MultiPolygon<f64>> = shapes.iter().map(|s| s.geometry.clone()).collect();
    let centers: Vec<Coord<f64>> = inputs.footprints.iter().map(Footprint::center).collect();
    let mut building_counts = vec![0u64; shapes.len()];
    for hits in geometry::shapes_containing(&geoms, &centers) {
        for h in hits {
            building_counts[h as usize] += 1;
        }
    }

    let promoting = qualifying(inputs.contours, inputs.thresholds.contour_min_area);
    let contour_tree = index_extents(promoting.iter().map(|c| Extent::of(&c.geometry).unwrap_or_else(Extent::empty)));

    let settlements = par::map_indexed(&shapes, |i, s| {
        let ext = Extent::of(&s.geometry).unwrap_or_else(Extent::empty);
        let contour_flag = contour_tree
            .locate_in_envelope_intersecting(&ext.to_aabb())
            .any(|e| promoting[e.idx as usize].geometry.intersects(&s.geometry));
        let building_count = building_counts[i];
        let area_m2 = inputs.units.area_m2(&s.geometry);
        let raster_building_count = inputs.counts.zonal_sum(&s.geometry, inputs.all_touched);
        let density_per_km2 = if area_m2 > 0.0 { raster_building_count as f64 / (area_m2 / 1e6) } else { 0.0 };
        Settlement {
            id: s.id,
            geometry: s.geometry.clone(),
            category: categorize(building_count, contour_flag, &inputs.thresholds),
            building_count,
            area_m2,
            contour_flag,
            raster_building_count,
            density_per_km2,
        }
    });

    for cat in Category::ALL {
        let n = settlements.iter().filter(|s| s.category == cat).count();
        log::info!("classified {n} settlements as {cat}");
    }
    settlements
}

// ── Data quality ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FindingKind {
    /// Footprint center inside no settlement.
    Orphaned,
    /// Footprint center inside more than one settlement.
    Overlap { settlement_ids: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub footprint_id: u64,
    pub kind: FindingKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub findings: Vec<Finding>,
    pub input_buildings: u64,
    /// Sum of settlement building counts; equals the input when every
    /// footprint is covered exactly once.
    pub counted_buildings: u64,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.input_buildings == self.counted_buildings
    }
}

pub fn check_coverage(footprints: &[Footprint], settlements: &[Settlement]) -> QualityReport {
    let geoms: Vec<MultiPolygon<f64>> = settlements.iter().map(|s| s.geometry.clone()).collect();
    let centers: Vec<Coord<f64>> = footprints.iter().map(Footprint::center).collect();
    let mut findings = Vec::new();
    for (fp, hits) in footprints.iter().zip(geometry::shapes_containing(&geoms, &centers)) {
        match hits.len() {
            1 => {}
            0 => findings.push(Finding { footprint_id: fp.id, kind: FindingKind::Orphaned }),
            _ => findings.push(Finding {
                footprint_id: fp.id,
                kind: FindingKind::Overlap {
                    settlement_ids: hits.iter().map(|&h| settlements[h as usize].id).collect(),
                },
            }),
        }
    }
    let report = QualityReport {
        input_buildings: footprints.len() as u64,
        counted_buildings: settlements.iter().map(|s| s.building_count).sum(),
        findings,
    };
    if !report.is_clean() {
        log::warn!(
            "data quality: {} findings, {} input buildings vs {} counted",
            report.findings.len(),
            report.input_buildings,
            report.counted_buildings
        );
    }
    report
}
