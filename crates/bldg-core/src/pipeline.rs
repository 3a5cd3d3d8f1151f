//! Pipeline orchestrator: runs every stage in order against an artifact
//! store.
//!
//! Per-cell stages (split, group, buffer, slice, corners) run data-parallel
//! over grid cells; collecting their results is the barrier before the next
//! stage. Dissolves and classification are single-threaded over the whole
//! set. Each stage reads only the persisted output of earlier stages, and is
//! skipped when its output already exists unless `clean` is set or an
//! earlier stage was recomputed in this run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::artifact::{self, ArtifactStore};
use crate::classify::{self, ClassifyInputs, QualityReport, Settlement, Thresholds};
use crate::config::Config;
use crate::contour::{self, ContourPolygon};
use crate::dissolve;
use crate::error::{AlignmentWarning, Result, SettleError};
use crate::footprint::{self, Footprint};
use crate::grid::{CellIndex, Grid};
use crate::grouping::{self, Group};
use crate::par;
use crate::raster::{Raster, RasterSpec};
use crate::realign::{self, CellCorners, RealignParams, Slice};
use crate::shape::{self, SettlementShape, ShapeParams};

// ── Stage and artifact names ──────────────────────────────────────────────────

pub const SPLIT: &str = "split";
pub const GROUPED: &str = "grouped";
pub const BUFFERED: &str = "buffered";
pub const SLICED: &str = "sliced";
pub const CORNERS: &str = "corners";
pub const GRID_KEY: &str = "grid.json";
pub const UNION_KEY: &str = "union.json";
pub const SHAPES_KEY: &str = "settlement_shapes.json";
pub const COUNT_RASTER_KEY: &str = "rasters/bldg_count.json";
pub const CONTOURS_KEY: &str = "contours.json";
pub const SETTLEMENTS_KEY: &str = "settlements.json";
pub const QUALITY_KEY: &str = "quality.json";

fn cell_key(stage: &str, grid: &Grid, cell: CellIndex) -> String {
    format!("{stage}/{}.json", grid.cell_name(cell))
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// One isolated failure, kept for the end-of-stage summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    /// `ConfigError`, `GeometryError` or `EngineError`.
    pub kind: String,
    pub subject: String,
    pub message: String,
}

impl ReportedError {
    pub fn new(subject: impl Into<String>, e: &SettleError) -> Self {
        Self { kind: e.kind().to_string(), subject: subject.into(), message: e.to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    /// Output already existed and was reused.
    pub skipped: bool,
    /// Items produced (footprints, groups, shapes, patches, ...).
    pub items: usize,
    pub errors: Vec<ReportedError>,
    pub warnings: Vec<AlignmentWarning>,
}

impl StageReport {
    fn new(stage: &str) -> Self {
        Self { stage: stage.to_string(), ..Default::default() }
    }

    fn skipped(stage: &str) -> Self {
        log::info!("{stage}: output exists, skipping");
        Self { stage: stage.to_string(), skipped: true, ..Default::default() }
    }

    fn log(&self) {
        log::info!(
            "{}: {} items, {} errors, {} warnings",
            self.stage,
            self.items,
            self.errors.len(),
            self.warnings.len()
        );
        for e in &self.errors {
            log::warn!("{}: {} {}: {}", self.stage, e.kind, e.subject, e.message);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub quality: QualityReport,
    pub settlement_count: usize,
}

impl RunReport {
    pub fn error_count(&self) -> usize {
        self.stages.iter().map(|s| s.errors.len()).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.stages.iter().map(|s| s.warnings.len()).sum()
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

/// Grid and expanded reference raster the run was partitioned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLayout {
    pub raster: RasterSpec,
    pub grid: Grid,
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Logs progress of a parallel loop at most every 3 seconds.
struct Progress {
    stage: String,
    total: usize,
    done: AtomicUsize,
    started: Instant,
    last: Mutex<Instant>,
}

impl Progress {
    fn new(stage: &str, total: usize) -> Self {
        let now = Instant::now();
        Self { stage: stage.to_string(), total, done: AtomicUsize::new(0), started: now, last: Mutex::new(now) }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let Ok(mut last) = self.last.try_lock() else {
            return;
        };
        if last.elapsed().as_secs() < 3 {
            return;
        }
        *last = Instant::now();
        let elapsed = self.started.elapsed().as_secs_f64();
        let remaining = elapsed / done as f64 * self.total.saturating_sub(done) as f64;
        log::info!("{}: {done}/{} cells, ~{remaining:.0}s remaining", self.stage, self.total);
    }
}

/// What a per-cell stage produced for one cell.
struct CellOutput<T> {
    value: T,
    items: usize,
    errors: Vec<ReportedError>,
    warnings: Vec<AlignmentWarning>,
}

impl<T> CellOutput<T> {
    fn new(value: T, items: usize) -> Self {
        Self { value, items, errors: Vec::new(), warnings: Vec::new() }
    }
}

struct RunState {
    /// An earlier stage was recomputed, so every later one must be too.
    dirty: bool,
    report: RunReport,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline<'a> {
    config: Config,
    store: &'a dyn ArtifactStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: Config, store: &'a dyn ArtifactStore) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every stage. Per-footprint, per-group and per-cell failures are
    /// collected in the report; only configuration errors and failures of the
    /// single-threaded stages abort the run.
    pub fn run(&self, footprints: Vec<Footprint>, raster: &RasterSpec) -> Result<RunReport> {
        raster.validate()?;
        par::with_workers(self.config.workers, || self.run_stages(footprints, raster))?
    }

    fn run_stages(&self, raw: Vec<Footprint>, raster: &RasterSpec) -> Result<RunReport> {
        let t0 = Instant::now();
        let mut st = RunState { dirty: self.config.clean, report: RunReport::default() };
        if self.config.clean {
            log::info!("clean run: discarding existing artifacts");
        }

        let ingested = footprint::ingest(raw);
        let mut ingest = StageReport::new("ingest");
        ingest.items = ingested.footprints.len();
        ingest.errors = ingested
            .rejected
            .iter()
            .map(|(id, e)| ReportedError::new(format!("footprint {id}"), e))
            .collect();
        if ingested.repaired > 0 {
            log::info!("ingest: repaired {} footprints", ingested.repaired);
        }
        ingest.log();
        st.report.stages.push(ingest);

        let spec = match footprint::layer_extent(&ingested.footprints) {
            Some(ext) => raster.expanded_to(&ext),
            None => raster.clone(),
        };
        if spec != *raster {
            log::info!(
                "reference raster expanded from {}x{} to {}x{} pixels",
                raster.num_cols,
                raster.num_rows,
                spec.num_cols,
                spec.num_rows
            );
        }
        let grid = Grid::aligned_to(&spec, self.config.chunk_rows, self.config.chunk_cols)?;
        let layout = RunLayout { raster: spec.clone(), grid: grid.clone() };
        if st.dirty || !self.store.exists(GRID_KEY) {
            artifact::write_json(self.store, GRID_KEY, &layout)?;
        }

        self.split(&mut st, &grid, ingested.footprints)?;
        self.group(&mut st, &grid)?;
        self.buffer(&mut st, &grid)?;
        self.union(&mut st, &grid)?;
        self.slice(&mut st, &grid)?;
        self.corners(&mut st, &grid, &spec)?;
        self.final_union(&mut st, &grid, &spec)?;
        self.rasters(&mut st, &grid, &spec)?;
        self.classify(&mut st, &grid)?;

        log::info!(
            "run finished in {:.1}s: {} settlements, {} errors, {} warnings",
            t0.elapsed().as_secs_f64(),
            st.report.settlement_count,
            st.report.error_count(),
            st.report.warning_count()
        );
        Ok(st.report)
    }

    // ── Stage helpers ──

    fn read_cell<T: DeserializeOwned>(&self, stage: &str, grid: &Grid, cell: CellIndex) -> Result<T> {
        artifact::read_json(self.store, &cell_key(stage, grid, cell))
    }

    /// Every footprint that was assigned to a cell, in cell order.
    fn all_footprints(&self, grid: &Grid) -> Result<Vec<Footprint>> {
        let mut out = Vec::new();
        for cell in grid.cells() {
            out.extend(self.read_cell::<Vec<Footprint>>(SPLIT, grid, cell)?);
        }
        Ok(out)
    }

    /// Run `work` for every cell and persist each output. A completed stage
    /// is reused; an incomplete one is discarded and recomputed from scratch.
    fn per_cell<T, F>(&self, st: &mut RunState, stage: &str, grid: &Grid, work: F) -> Result<()>
    where
        T: Serialize + Send,
        F: Fn(CellIndex) -> Result<CellOutput<T>> + Sync + Send,
    {
        if !st.dirty && artifact::is_complete(self.store, stage) {
            st.report.stages.push(StageReport::skipped(stage));
            return Ok(());
        }
        self.store.remove(stage)?;
        st.dirty = true;

        let cells: Vec<CellIndex> = grid.cells().collect();
        let progress = Progress::new(stage, cells.len());
        let results = par::map_indexed(&cells, |_, &cell| {
            let out = work(cell).and_then(|out| {
                artifact::write_json(self.store, &cell_key(stage, grid, cell), &out.value)?;
                Ok(out)
            });
            progress.tick();
            (cell, out)
        });

        let mut report = StageReport::new(stage);
        let mut failed = 0usize;
        for (cell, out) in results {
            match out {
                Ok(out) => {
                    report.items += out.items;
                    report.errors.extend(out.errors);
                    report.warnings.extend(out.warnings);
                }
                Err(e) => {
                    failed += 1;
                    report.errors.push(ReportedError::new(grid.cell_name(cell), &e));
                }
            }
        }
        if failed == 0 {
            artifact::mark_complete(self.store, stage)?;
        } else {
            log::warn!("{stage}: {failed} cells failed; stage will be recomputed on the next run");
        }
        report.log();
        st.report.stages.push(report);
        Ok(())
    }

    /// Run a single-threaded stage producing one artifact.
    fn single<T, F>(&self, st: &mut RunState, stage: &str, key: &str, work: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&mut StageReport) -> Result<T>,
    {
        if !st.dirty && self.store.exists(key) {
            st.report.stages.push(StageReport::skipped(stage));
            return Ok(());
        }
        st.dirty = true;
        let mut report = StageReport::new(stage);
        let value = work(&mut report)?;
        artifact::write_json(self.store, key, &value)?;
        report.log();
        st.report.stages.push(report);
        Ok(())
    }

    // ── Stages ──

    fn split(&self, st: &mut RunState, grid: &Grid, footprints: Vec<Footprint>) -> Result<()> {
        let (cells, outside) = footprint::assign_to_cells(footprints, grid);
        let outside_errors: Vec<ReportedError> = outside
            .iter()
            .map(|f| {
                let subject = format!("footprint {}", f.id);
                ReportedError::new(subject.clone(), &SettleError::geometry(subject, "extent center outside the grid"))
            })
            .collect();
        self.per_cell(st, SPLIT, grid, |cell| {
            let fps = cells[grid.flat(cell)].clone();
            let n = fps.len();
            Ok(CellOutput::new(fps, n))
        })?;
        if let Some(report) = st.report.stages.last_mut().filter(|r| !r.skipped) {
            report.errors.extend(outside_errors);
        }
        Ok(())
    }

    fn group(&self, st: &mut RunState, grid: &Grid) -> Result<()> {
        let distance = self.config.group_distance;
        self.per_cell(st, GROUPED, grid, |cell| {
            let fps: Vec<Footprint> = self.read_cell(SPLIT, grid, cell)?;
            let outcome = grouping::group_footprints(fps, distance, grid.flat(cell));
            let n = outcome.groups.len();
            let mut out = CellOutput::new(outcome.groups, n);
            out.errors = outcome
                .failures
                .iter()
                .map(|(id, e)| ReportedError::new(format!("footprint {id}"), e))
                .collect();
            Ok(out)
        })
    }

    fn buffer(&self, st: &mut RunState, grid: &Grid) -> Result<()> {
        let params = ShapeParams::from(&self.config);
        self.per_cell(st, BUFFERED, grid, |cell| {
            let groups: Vec<Group> = self.read_cell(GROUPED, grid, cell)?;
            let mut shapes = Vec::with_capacity(groups.len());
            let mut errors = Vec::new();
            for g in &groups {
                match shape::build_shape(g, &params) {
                    Ok(s) => shapes.push(s),
                    Err(e) => errors.push(ReportedError::new(format!("group {}", g.id), &e)),
                }
            }
            let n = shapes.len();
            let mut out = CellOutput::new(shapes, n);
            out.errors = errors;
            Ok(out)
        })
    }

    fn union(&self, st: &mut RunState, grid: &Grid) -> Result<()> {
        self.single(st, "union", UNION_KEY, |report| {
            let mut shapes: Vec<SettlementShape> = Vec::new();
            for cell in grid.cells() {
                match self.read_cell::<Vec<SettlementShape>>(BUFFERED, grid, cell) {
                    Ok(s) => shapes.extend(s),
                    Err(e) => report.errors.push(ReportedError::new(grid.cell_name(cell), &e)),
                }
            }
            let out = dissolve::dissolve(shapes);
            report.items = out.shapes.len();
            report.errors.extend(out.failures.iter().map(|e| ReportedError::new("dissolve", e)));
            Ok(out.shapes)
        })
    }

    fn slice(&self, st: &mut RunState, grid: &Grid) -> Result<()> {
        if !st.dirty && artifact::is_complete(self.store, SLICED) {
            st.report.stages.push(StageReport::skipped(SLICED));
            return Ok(());
        }
        let shapes: Vec<SettlementShape> = artifact::read_json(self.store, UNION_KEY)?;
        let by_cell = realign::slice_settlements(&shapes, grid);
        self.per_cell(st, SLICED, grid, |cell| {
            let slices = by_cell[grid.flat(cell)].clone();
            let n = slices.len();
            Ok(CellOutput::new(slices, n))
        })
    }

    fn corners(&self, st: &mut RunState, grid: &Grid, spec: &RasterSpec) -> Result<()> {
        let params = RealignParams::new(spec, self.config.corner_search_pixels);
        self.per_cell(st, CORNERS, grid, |cell| {
            let fps: Vec<Footprint> = self.read_cell(SPLIT, grid, cell)?;
            let mut neighbourhood: Vec<Slice> = Vec::new();
            for n in grid.neighbourhood(cell) {
                neighbourhood.extend(self.read_cell::<Vec<Slice>>(SLICED, grid, n)?);
            }
            let refs: Vec<&Slice> = neighbourhood.iter().collect();
            let found = realign::find_corners(&fps, &refs, spec, &params);
            let n = found.records.len();
            let warnings = found.warnings.clone();
            let mut out = CellOutput::new(found, n);
            out.warnings = warnings;
            Ok(out)
        })
    }

    fn final_union(&self, st: &mut RunState, grid: &Grid, spec: &RasterSpec) -> Result<()> {
        self.single(st, "final_union", SHAPES_KEY, |report| {
            let shapes: Vec<SettlementShape> = artifact::read_json(self.store, UNION_KEY)?;
            let mut records = Vec::new();
            for cell in grid.cells() {
                match self.read_cell::<CellCorners>(CORNERS, grid, cell) {
                    Ok(c) => records.extend(c.records),
                    Err(e) => report.errors.push(ReportedError::new(grid.cell_name(cell), &e)),
                }
            }
            let out = realign::apply_corners(shapes, &records);
            report.items = out.shapes.len();
            report.errors.extend(out.failures.iter().map(|e| ReportedError::new("corner union", e)));
            report.warnings = realign::misaligned(&self.all_footprints(grid)?, &out.shapes, spec);
            Ok(out.shapes)
        })
    }

    fn rasters(&self, st: &mut RunState, grid: &Grid, spec: &RasterSpec) -> Result<()> {
        self.single(st, "contours", CONTOURS_KEY, |report| {
            let centers: Vec<_> = self.all_footprints(grid)?.iter().map(Footprint::center).collect();
            let counts = Raster::count_points(spec.clone(), centers);
            artifact::write_json(self.store, COUNT_RASTER_KEY, &counts)?;
            let contours = contour::dense_contours(&counts, self.config.contour_value, self.config.units);
            log::debug!("building count raster max {} per pixel", counts.max_value());
            report.items = contours.len();
            Ok(contours)
        })
    }

    fn classify(&self, st: &mut RunState, grid: &Grid) -> Result<()> {
        let footprints = self.all_footprints(grid)?;
        self.single(st, "classify", SETTLEMENTS_KEY, |report| {
            let shapes: Vec<SettlementShape> = artifact::read_json(self.store, SHAPES_KEY)?;
            let contours: Vec<ContourPolygon> = artifact::read_json(self.store, CONTOURS_KEY)?;
            let counts: Raster<u32> = artifact::read_json(self.store, COUNT_RASTER_KEY)?;
            let inputs = ClassifyInputs {
                footprints: &footprints,
                contours: &contours,
                counts: &counts,
                thresholds: Thresholds::from(&self.config),
                units: self.config.units,
                all_touched: self.config.all_touched,
            };
            let settlements = classify::classify(shapes, &inputs);
            report.items = settlements.len();
            Ok(settlements)
        })?;

        let settlements: Vec<Settlement> = artifact::read_json(self.store, SETTLEMENTS_KEY)?;
        let quality = classify::check_coverage(&footprints, &settlements);
        artifact::write_json(self.store, QUALITY_KEY, &quality)?;
        st.report.settlement_count = settlements.len();
        st.report.quality = quality;
        Ok(())
    }
}
