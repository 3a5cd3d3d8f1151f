//! Error taxonomy shared by every stage.
//!
//! `Config` is fatal and raised before any processing starts. `Geometry` and
//! `Engine` are isolated at footprint, group or cell granularity by the
//! pipeline and collected into a stage report. Alignment problems are never
//! errors: see [`AlignmentWarning`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettleError {
    /// Invalid partition or threshold parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid or unrepairable input or derived geometry.
    #[error("geometry error ({subject}): {reason}")]
    Geometry { subject: String, reason: String },

    /// Failure inside the geometry/raster engine or its storage.
    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SettleError {
    pub fn config(msg: impl Into<String>) -> Self {
        SettleError::Config(msg.into())
    }

    pub fn geometry(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        SettleError::Geometry {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        SettleError::Engine(msg.into())
    }

    /// I/O-backed failures are worth one retry; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, SettleError::Io(_))
    }

    /// Short taxonomy label used in stage reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SettleError::Config(_) => "ConfigError",
            SettleError::Geometry { .. } => "GeometryError",
            SettleError::Engine(_) | SettleError::Io(_) | SettleError::Json(_) => "EngineError",
        }
    }
}

pub type Result<T> = std::result::Result<T, SettleError>;

/// A raster pixel whose center could not be brought inside its settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentWarning {
    pub footprint_id: u64,
    pub raster_col: i64,
    pub raster_row: i64,
    pub reason: String,
}

/// Run `op`, retrying exactly once when the first failure is transient.
pub fn retry_once<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(e) if e.is_transient() => {
            log::warn!("transient failure, retrying once: {e}");
            op()
        }
        other => other,
    }
}
