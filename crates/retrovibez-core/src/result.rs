//! Per-track stage outcomes.
//!
//! Both result types are produced once and never mutated; a retry produces a
//! new value that replaces the old one.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::track::TrackId;

/// Outcome of the external analysis for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AnalysisStatus {
    /// The engine produced a complete artifact.
    Ok { artifact: PathBuf },
    /// The engine exited cleanly but no complete artifact exists.
    Missing,
    /// The engine exited non-zero, timed out, or could not be started.
    EngineFailed { message: String },
}

impl AnalysisStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, AnalysisStatus::Ok { .. })
    }

    /// Short stable label (`ok`, `missing`, `engine_failed`).
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisStatus::Ok { .. } => "ok",
            AnalysisStatus::Missing => "missing",
            AnalysisStatus::EngineFailed { .. } => "engine_failed",
        }
    }

    /// Human readable failure text, if any.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            AnalysisStatus::Ok { .. } => None,
            AnalysisStatus::Missing => Some("engine exited cleanly but wrote no artifact".into()),
            AnalysisStatus::EngineFailed { message } => Some(message.clone()),
        }
    }

    /// Ordering used to break ties between records for the same track.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            AnalysisStatus::Ok { .. } => 0,
            AnalysisStatus::Missing => 1,
            AnalysisStatus::EngineFailed { .. } => 2,
        }
    }
}

/// Analysis outcome plus the figures the pipeline reports for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub track_id: TrackId,
    #[serde(flatten)]
    pub status: AnalysisStatus,
    /// Accepted reversal events (zero unless the status is `Ok`).
    pub reversal_count: usize,
    /// Events the engine reported that failed the minimum-duration check.
    pub rejected_events: usize,
    /// Recorded span of the track in seconds.
    pub duration_seconds: f64,
    /// Wall-clock time spent in the engine.
    pub engine_ms: u64,
}

impl AnalysisResult {
    /// A failed result with no measurements.
    pub fn failed(track_id: TrackId, status: AnalysisStatus, engine_ms: u64) -> Self {
        Self {
            track_id,
            status,
            reversal_count: 0,
            rejected_events: 0,
            duration_seconds: 0.0,
            engine_ms,
        }
    }

    /// Artifact path when the analysis succeeded.
    pub fn artifact(&self) -> Option<&PathBuf> {
        match &self.status {
            AnalysisStatus::Ok { artifact } => Some(artifact),
            _ => None,
        }
    }
}

/// Outcome of the figure job for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum FigureStatus {
    Ok { figures: Vec<PathBuf> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureResult {
    pub track_id: TrackId,
    #[serde(flatten)]
    pub status: FigureStatus,
}

impl FigureResult {
    pub fn ok(track_id: TrackId, mut figures: Vec<PathBuf>) -> Self {
        figures.sort();
        Self {
            track_id,
            status: FigureStatus::Ok { figures },
        }
    }

    pub fn failed(track_id: TrackId, message: impl Into<String>) -> Self {
        Self {
            track_id,
            status: FigureStatus::Failed {
                message: message.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, FigureStatus::Ok { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(n: u32) -> TrackId {
        TrackId::new(n).expect("nonzero")
    }

    #[test]
    fn test_analysis_status_labels() {
        assert_eq!(AnalysisStatus::Missing.label(), "missing");
        let failed = AnalysisStatus::EngineFailed {
            message: "exit 3".into(),
        };
        assert_eq!(failed.label(), "engine_failed");
        assert_eq!(failed.failure_message().as_deref(), Some("exit 3"));
        assert!(AnalysisStatus::Ok {
            artifact: PathBuf::from("a.json")
        }
        .failure_message()
        .is_none());
    }

    #[test]
    fn test_analysis_result_serializes_flat() {
        let result = AnalysisResult::failed(
            id(2),
            AnalysisStatus::EngineFailed {
                message: "boom".into(),
            },
            12,
        );
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["track_id"], json!(2));
        assert_eq!(value["status"], json!("engine_failed"));
        assert_eq!(value["message"], json!("boom"));
        assert!(result.artifact().is_none());
    }

    #[test]
    fn test_figure_result_sorts_paths() {
        let result = FigureResult::ok(
            id(1),
            vec![PathBuf::from("b.png"), PathBuf::from("a.png")],
        );
        assert_eq!(
            result.status,
            FigureStatus::Ok {
                figures: vec![PathBuf::from("a.png"), PathBuf::from("b.png")]
            }
        );
        assert!(result.is_ok());
        assert!(!FigureResult::failed(id(1), "x").is_ok());
    }
}
