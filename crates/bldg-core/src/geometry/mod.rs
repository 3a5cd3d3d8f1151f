//! Geometry primitives adapter.
//!
//! Every planar operation the pipeline needs (buffer, union, clip, hole
//! filling, validity and repair, area, nearest-boundary search) goes through
//! this module, so the rest of the crate never talks to the `geo` engine
//! directly for anything more than its types.

pub mod metric;
pub mod ops;

pub use metric::{LocalFrame, Units, METRES_PER_DEGREE};
pub use ops::{
    buffer_polygon, check_valid, clip_to_extent, contains_coord, empty, fill_holes, nearest_boundary_point, repair,
    shapes_containing, union_all, vertex_count,
};

use geo::MultiPolygon;

use crate::error::{Result, SettleError};

/// Validate `shape`; on failure repair once and validate again.
pub fn ensure_valid(shape: MultiPolygon<f64>, subject: impl Into<String>) -> Result<MultiPolygon<f64>> {
    if check_valid(&shape).is_ok() {
        return Ok(shape);
    }
    let subject = subject.into();
    let repaired = repair(&shape);
    match check_valid(&repaired) {
        Ok(()) => {
            log::debug!("{subject}: repaired invalid geometry");
            Ok(repaired)
        }
        Err(reason) => Err(SettleError::geometry(subject, reason)),
    }
}
