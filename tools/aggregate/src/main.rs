/// Settlement aggregation tool: reads a footprint layer and a reference
/// raster description, runs every pipeline stage into a working directory
/// and prints the per-stage report.
///
/// Stage outputs already present in the working directory are reused unless
/// `--clean` is given.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use bldg_core::artifact::{self, ArtifactStore, FsArtifactStore};
use bldg_core::config::{load_config, Config};
use bldg_core::footprint::FootprintLayer;
use bldg_core::pipeline::{Pipeline, RunReport, SETTLEMENTS_KEY};
use bldg_core::raster::RasterSpec;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "aggregate",
    about = "Aggregate building footprints into BUA / SSA / Hamlet settlements"
)]
struct Args {
    /// Run configuration (JSON; missing keys use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Footprint layer JSON ({"footprints": [{"id", "geometry"}, ...]})
    #[arg(long)]
    buildings: PathBuf,

    /// Reference raster description JSON (origin, pixel size, dimensions)
    #[arg(long)]
    raster: PathBuf,

    /// Working directory for stage artifacts (created if absent)
    #[arg(short, long, default_value = "data/work")]
    work_dir: PathBuf,

    /// Discard existing artifacts and recompute every stage
    #[arg(long)]
    clean: bool,

    /// Override the grouping distance
    #[arg(long)]
    group_distance: Option<f64>,

    /// Override the grid row count
    #[arg(long)]
    chunk_rows: Option<u32>,

    /// Override the grid column count
    #[arg(long)]
    chunk_cols: Option<u32>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("Cannot load {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(d) = args.group_distance {
        config.group_distance = d;
    }
    if let Some(r) = args.chunk_rows {
        config.chunk_rows = r;
    }
    if let Some(c) = args.chunk_cols {
        config.chunk_cols = c;
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    config.clean |= args.clean;
    Ok(config)
}

fn print_report(report: &RunReport) {
    eprintln!();
    eprintln!("{:<14} {:>8} {:>8} {:>8}  status", "stage", "items", "errors", "warnings");
    eprintln!("{}", "─".repeat(52));
    for s in &report.stages {
        let status = if s.skipped { "reused" } else { "ran" };
        eprintln!(
            "{:<14} {:>8} {:>8} {:>8}  {}",
            s.stage,
            s.items,
            s.errors.len(),
            s.warnings.len(),
            status
        );
    }
    eprintln!("{}", "─".repeat(52));
    eprintln!("settlements: {}", report.settlement_count);
    let q = &report.quality;
    eprintln!(
        "coverage: {}/{} building centers counted, {} findings",
        q.counted_buildings,
        q.input_buildings,
        q.findings.len()
    );
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str())).init();

    let config = build_config(&args)?;
    let layer: FootprintLayer = artifact::read_json_file(&args.buildings)
        .with_context(|| format!("Cannot read {}", args.buildings.display()))?;
    let raster: RasterSpec = artifact::read_json_file(&args.raster)
        .with_context(|| format!("Cannot read {}", args.raster.display()))?;
    eprintln!(
        "[aggregate] {} footprints, raster {}x{}, grid {}x{}",
        layer.footprints.len(),
        raster.num_cols,
        raster.num_rows,
        config.chunk_rows,
        config.chunk_cols
    );

    fs::create_dir_all(&args.work_dir)?;
    let store = FsArtifactStore::new(&args.work_dir)?;
    let pipeline = Pipeline::new(config, &store)?;
    let report = pipeline.run(layer.footprints, &raster)?;

    let summary = args.work_dir.join("run_report.json");
    log::info!("writing run report to {}", summary.display());
    fs::write(&summary, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Cannot write {}", summary.display()))?;

    print_report(&report);
    if !store.exists(SETTLEMENTS_KEY) {
        bail!("run finished without {SETTLEMENTS_KEY}");
    }
    eprintln!("Output: {}", store.path(SETTLEMENTS_KEY).display());
    Ok(())
}
