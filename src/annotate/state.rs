//! Export session state
//!
//! ```text
//! Idle ──start──► Exporting(p) ──► Completed
//!                      │
//!                      └─────────► Failed(reason)
//! ```
//!
//! Progress only moves forward within one session, and a terminal state is
//! published exactly once.

use std::path::PathBuf;
use thiserror::Error;

/// Why an export session did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("invalid export range {start:.3}s - {end:.3}s for a {duration:.3}s asset")]
    InvalidRange { start: f64, end: f64, duration: f64 },

    #[error("an export is already running")]
    Busy,

    #[error("encoding failed: {0}")]
    EncodeFailure(String),

    #[error("failed to save export: {0}")]
    PersistFailed(String),

    #[error("export cancelled")]
    Cancelled,
}

/// Observable state of an [`ExportPipeline`](super::export::ExportPipeline).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExportState {
    #[default]
    Idle,
    /// Fraction of frames written, `0.0..=1.0`
    Exporting { progress: f32 },
    /// Final location of the saved file
    Completed { output: PathBuf },
    Failed { reason: ExportError },
}

impl ExportState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Exporting { .. })
    }

    /// Progress while exporting; 1.0 once completed.
    #[must_use]
    pub fn progress(&self) -> Option<f32> {
        match self {
            Self::Exporting { progress } => Some(*progress),
            Self::Completed { .. } => Some(1.0),
            Self::Idle | Self::Failed { .. } => None,
        }
    }
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Exporting { progress } => write!(f, "exporting {:.0}%", progress * 100.0),
            Self::Completed { output } => write!(f, "completed: {}", output.display()),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
