/// Settlement summary tool: reads `settlements.json` from a working directory
/// and prints count, buildings and area per category. With `--export` the
/// settlement table is also written as a standalone JSON file.
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use bldg_core::artifact::read_json_file;
use bldg_core::classify::{Category, Settlement};
use bldg_core::pipeline::SETTLEMENTS_KEY;

#[derive(Parser, Debug)]
#[command(name = "summarize", about = "Per-category summary of classified settlements")]
struct Args {
    /// Working directory written by `aggregate`
    #[arg(short, long, default_value = "data/work")]
    work_dir: PathBuf,

    /// Write the settlement table (id, category, counts, area, geometry) here
    #[arg(long)]
    export: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Default, Serialize)]
struct CategoryTotals {
    settlements: usize,
    buildings: u64,
    area_km2: f64,
    contour_promoted: usize,
}

fn totals(settlements: &[Settlement]) -> BTreeMap<Category, CategoryTotals> {
    let mut out: BTreeMap<Category, CategoryTotals> = Category::ALL.iter().map(|&c| (c, CategoryTotals::default())).collect();
    for s in settlements {
        let t = out.entry(s.category).or_default();
        t.settlements += 1;
        t.buildings += s.building_count;
        t.area_km2 += s.area_m2 / 1e6;
        if s.contour_flag {
            t.contour_promoted += 1;
        }
    }
    out
}

/// One exported row. Field order is the column order of the table.
#[derive(Serialize)]
struct ExportRow<'a> {
    id: u64,
    category: &'static str,
    building_count: u64,
    area_m2: f64,
    density_per_km2: f64,
    geometry: &'a geo::MultiPolygon<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str())).init();

    let path = args.work_dir.join(SETTLEMENTS_KEY);
    let settlements: Vec<Settlement> =
        read_json_file(&path).with_context(|| format!("Cannot read {}", path.display()))?;
    log::info!("loaded {} settlements from {}", settlements.len(), path.display());

    println!("{:<8} {:>12} {:>12} {:>14} {:>10}", "category", "settlements", "buildings", "area (km²)", "contour");
    println!("{}", "─".repeat(60));
    let by_cat = totals(&settlements);
    for (cat, t) in &by_cat {
        println!(
            "{:<8} {:>12} {:>12} {:>14.3} {:>10}",
            cat.as_str(),
            t.settlements,
            t.buildings,
            t.area_km2,
            t.contour_promoted
        );
    }
    println!("{}", "─".repeat(60));
    println!(
        "{:<8} {:>12} {:>12} {:>14.3}",
        "total",
        settlements.len(),
        by_cat.values().map(|t| t.buildings).sum::<u64>(),
        by_cat.values().map(|t| t.area_km2).sum::<f64>()
    );

    if let Some(out) = &args.export {
        let rows: Vec<ExportRow> = settlements
            .iter()
            .map(|s| ExportRow {
                id: s.id,
                category: s.category.as_str(),
                building_count: s.building_count,
                area_m2: s.area_m2,
                density_per_km2: s.density_per_km2,
                geometry: &s.geometry,
            })
            .collect();
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(out, serde_json::to_string_pretty(&rows)?)
            .with_context(|| format!("Cannot write {}", out.display()))?;
        eprintln!("Exported {} rows to {}", rows.len(), out.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn settlement(id: u64, category: Category, building_count: u64, area_m2: f64, contour_flag: bool) -> Settlement {
        Settlement {
            id,
            geometry: MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)]]),
            category,
            building_count,
            area_m2,
            contour_flag,
            raster_building_count: building_count,
            density_per_km2: 0.0,
        }
    }

    #[test]
    fn totals_cover_every_category() {
        let rows = vec![
            settlement(0, Category::Bua, 4000, 2.5e6, false),
            settlement(1, Category::Bua, 20, 1.0e6, true),
            settlement(2, Category::Hamlet, 3, 1.0e4, false),
        ];
        let t = totals(&rows);
        assert_eq!(t.len(), 3, "categories without settlements still appear");
        assert_eq!(t[&Category::Bua].settlements, 2);
        assert_eq!(t[&Category::Bua].buildings, 4020);
        assert_eq!(t[&Category::Bua].contour_promoted, 1);
        assert!((t[&Category::Bua].area_km2 - 3.5).abs() < 1e-9);
        assert_eq!(t[&Category::Ssa].settlements, 0);
        assert_eq!(t[&Category::Hamlet].buildings, 3);
    }
}
