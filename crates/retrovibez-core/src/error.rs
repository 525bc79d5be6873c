//! Run-fatal errors.
//!
//! Per-track failures are values ([`AnalysisStatus`], [`FigureStatus`]) and
//! never show up here. A [`RunFatalError`] means the run produced no usable
//! result and moves the pipeline to `Aborted`.
//!
//! [`AnalysisStatus`]: crate::result::AnalysisStatus
//! [`FigureStatus`]: crate::result::FigureStatus

use thiserror::Error;

use crate::dataset::LocateError;
use crate::selection::SelectionError;

#[derive(Debug, Error)]
pub enum RunFatalError {
    #[error("track selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("dataset could not be located: {0}")]
    Locate(#[from] LocateError),

    /// Every selected track failed analysis.
    #[error("no track produced a usable analysis ({failed} of {selected} failed)")]
    NoUsableTracks { selected: usize, failed: usize },

    /// The run was cancelled at a stage boundary.
    #[error("run cancelled before {stage}")]
    Cancelled { stage: String },

    /// The output tree or summary could not be written.
    #[error("failed to write run output: {0}")]
    Output(String),
}

impl RunFatalError {
    /// Short stable label for manifests and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RunFatalError::Selection(_) => "selection",
            RunFatalError::Locate(_) => "locate",
            RunFatalError::NoUsableTracks { .. } => "no_usable_tracks",
            RunFatalError::Cancelled { .. } => "cancelled",
            RunFatalError::Output(_) => "output",
        }
    }
}

/// Convenience result alias.
pub type RunResult<T> = std::result::Result<T, RunFatalError>;
