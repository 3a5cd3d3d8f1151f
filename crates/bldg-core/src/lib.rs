//! Settlement aggregation from building footprints.
//!
//! Footprints are split over a grid of cells, grouped by extent proximity,
//! buffered into settlement shapes, dissolved across cells, realigned to the
//! pixel centers of a reference raster and finally classified as BUA, SSA or
//! Hamlet. [`pipeline::Pipeline`] runs the whole sequence.

pub mod artifact;
pub mod classify;
pub mod config;
pub mod contour;
pub mod dissolve;
pub mod error;
pub mod extent;
pub mod footprint;
pub mod geometry;
pub mod grid;
pub mod grouping;
pub mod par;
pub mod pipeline;
pub mod raster;
pub mod realign;
pub mod shape;
pub mod union_find;

pub use error::{AlignmentWarning, Result, SettleError};
