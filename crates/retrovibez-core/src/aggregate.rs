//! Run-level aggregation.
//!
//! [`aggregate`] merges per-track analysis and figure outcomes into a
//! [`RunSummary`] keyed and sorted by track id. It is a pure function: the
//! order of its inputs never shows up in its output, so serializing the
//! summary twice from the same results gives byte-identical JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::result::{AnalysisResult, AnalysisStatus, FigureResult, FigureStatus};
use crate::track::TrackId;

/// Version of the `analysis_summary.json` layout.
pub const SUMMARY_SCHEMA_VERSION: &str = "1.0";

/// Figure outcome as recorded in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum FigureRecord {
    Ok { figures: Vec<PathBuf> },
    Failed { message: String },
    /// The track never reached the figure stage.
    Skipped,
}

impl FigureRecord {
    pub fn label(&self) -> &'static str {
        match self {
            FigureRecord::Ok { .. } => "ok",
            FigureRecord::Failed { .. } => "failed",
            FigureRecord::Skipped => "skipped",
        }
    }
}

/// One line of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: TrackId,
    pub analysis: AnalysisStatus,
    pub reversal_count: usize,
    pub rejected_events: usize,
    pub duration_seconds: f64,
    pub figures: FigureRecord,
}

impl TrackRecord {
    /// Analysis produced an artifact and no figure job failed for it.
    pub fn succeeded(&self) -> bool {
        self.analysis.is_ok() && !matches!(self.figures, FigureRecord::Failed { .. })
    }
}

/// Stage in which a track failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Analysis,
    Figures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFailure {
    pub track_id: TrackId,
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_tracks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_figures: usize,
    pub total_reversal_events: usize,
}

/// Hand-off artifact for the report stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: String,
    pub tracks: Vec<TrackRecord>,
    pub totals: RunTotals,
    pub failures: Vec<TrackFailure>,
}

impl RunSummary {
    /// Canonical serialized form written to `analysis_summary.json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn record(&self, track_id: TrackId) -> Option<&TrackRecord> {
        self.tracks
            .binary_search_by_key(&track_id, |r| r.track_id)
            .ok()
            .map(|idx| &self.tracks[idx])
    }
}

/// Deterministic choice between two results for the same track.
fn prefer_analysis(a: &AnalysisResult, b: &AnalysisResult) -> bool {
    let key = |r: &AnalysisResult| (r.status.rank(), serde_json::to_string(r).unwrap_or_default());
    key(a) <= key(b)
}

fn prefer_figure(a: &FigureResult, b: &FigureResult) -> bool {
    match (&a.status, &b.status) {
        (FigureStatus::Ok { .. }, FigureStatus::Failed { .. }) => true,
        (FigureStatus::Failed { .. }, FigureStatus::Ok { .. }) => false,
        (FigureStatus::Ok { figures: fa }, FigureStatus::Ok { figures: fb }) => fa <= fb,
        (FigureStatus::Failed { message: ma }, FigureStatus::Failed { message: mb }) => ma <= mb,
    }
}

/// Merge analysis and figure outcomes into a sorted summary.
///
/// Every track in `analysis` appears exactly once. Tracks without a figure
/// result are recorded as [`FigureRecord::Skipped`]; figure results for
/// tracks that were never analyzed are ignored. Duplicate entries for one
/// track resolve the same way regardless of input order.
pub fn aggregate(analysis: &[AnalysisResult], figures: &[FigureResult]) -> RunSummary {
    let mut by_track: BTreeMap<TrackId, &AnalysisResult> = BTreeMap::new();
    for result in analysis {
        by_track
            .entry(result.track_id)
            .and_modify(|kept| {
                if !prefer_analysis(kept, result) {
                    *kept = result;
                }
            })
            .or_insert(result);
    }

    let mut figure_by_track: BTreeMap<TrackId, &FigureResult> = BTreeMap::new();
    for result in figures {
        figure_by_track
            .entry(result.track_id)
            .and_modify(|kept| {
                if !prefer_figure(kept, result) {
                    *kept = result;
                }
            })
            .or_insert(result);
    }

    let mut tracks = Vec::with_capacity(by_track.len());
    let mut failures = Vec::new();
    let mut totals = RunTotals::default();

    for (track_id, result) in by_track {
        let figures = match figure_by_track.get(&track_id) {
            Some(fig) => match &fig.status {
                FigureStatus::Ok { figures } => FigureRecord::Ok {
                    figures: figures.clone(),
                },
                FigureStatus::Failed { message } => FigureRecord::Failed {
                    message: message.clone(),
                },
            },
            None => FigureRecord::Skipped,
        };

        if let Some(message) = result.status.failure_message() {
            failures.push(TrackFailure {
                track_id,
                stage: FailureStage::Analysis,
                message,
            });
        }
        if let FigureRecord::Failed { message } = &figures {
            failures.push(TrackFailure {
                track_id,
                stage: FailureStage::Figures,
                message: message.clone(),
            });
        }

        let record = TrackRecord {
            track_id,
            analysis: result.status.clone(),
            reversal_count: result.reversal_count,
            rejected_events: result.rejected_events,
            duration_seconds: result.duration_seconds,
            figures,
        };

        totals.total_tracks += 1;
        if record.succeeded() {
            totals.succeeded += 1;
        } else {
            totals.failed += 1;
        }
        if record.figures == FigureRecord::Skipped {
            totals.skipped_figures += 1;
        }
        if record.analysis.is_ok() {
            totals.total_reversal_events += record.reversal_count;
        }
        tracks.push(record);
    }

    failures.sort_by(|a, b| (a.track_id, a.stage).cmp(&(b.track_id, b.stage)));

    RunSummary {
        schema_version: SUMMARY_SCHEMA_VERSION.to_string(),
        tracks,
        totals,
        failures,
    }
}
