//! Pipeline lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one run.
///
/// `Init → Selecting → Locating → Analyzing → FigureGen → Aggregating → Done`,
/// with a jump to `Aborted` allowed from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Selecting,
    Locating,
    Analyzing,
    FigureGen,
    Aggregating,
    Done,
    Aborted,
}

impl PipelineState {
    /// Stable name used in logs and the run manifest.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::Selecting => "selecting",
            PipelineState::Locating => "locating",
            PipelineState::Analyzing => "analyzing",
            PipelineState::FigureGen => "figure_gen",
            PipelineState::Aggregating => "aggregating",
            PipelineState::Done => "done",
            PipelineState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Aborted)
    }

    /// The state after this one on the success path.
    pub fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Init => Some(PipelineState::Selecting),
            PipelineState::Selecting => Some(PipelineState::Locating),
            PipelineState::Locating => Some(PipelineState::Analyzing),
            PipelineState::Analyzing => Some(PipelineState::FigureGen),
            PipelineState::FigureGen => Some(PipelineState::Aggregating),
            PipelineState::Aggregating => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Aborted => None,
        }
    }

    /// Whether moving to `to` keeps the machine forward-only.
    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == PipelineState::Aborted || self.next() == Some(to)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
