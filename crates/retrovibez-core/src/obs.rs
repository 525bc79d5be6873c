//! Structured lifecycle events for a pipeline run.
//!
//! [`run_span`] tags everything logged during a run with its `run_id`; the
//! `emit_*` helpers give each lifecycle event a stable `event` field so log
//! pipelines can filter on it.

use tracing::{info, warn};

use crate::track::TrackId;

/// Span that tags everything logged during one run with its `run_id`.
///
/// Attach it to the run future with `tracing::Instrument` so it follows the
/// task across await points.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("retrovibez.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, dataset: &str, selection: &str) {
    info!(event = "run.started", run_id = %run_id, dataset = %dataset, selection = %selection);
}

pub fn emit_stage_entered(stage: &str) {
    info!(event = "run.stage_entered", stage = %stage);
}

pub fn emit_track_analyzed(track_id: TrackId, status: &str, reversal_count: usize, engine_ms: u64) {
    info!(
        event = "track.analyzed",
        track_id = %track_id,
        status = %status,
        reversal_count = reversal_count,
        engine_ms = engine_ms,
    );
}

pub fn emit_track_figures(track_id: TrackId, ok: bool, figure_count: usize) {
    info!(
        event = "track.figures",
        track_id = %track_id,
        ok = ok,
        figure_count = figure_count,
    );
}

pub fn emit_run_finished(duration_ms: u64, total_tracks: usize, failed: usize) {
    info!(
        event = "run.finished",
        duration_ms = duration_ms,
        total_tracks = total_tracks,
        failed = failed,
    );
}

/// Aborts are logged at warn level.
pub fn emit_run_aborted(stage: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "run.aborted", stage = %stage, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_scopes_events() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
        emit_stage_entered("selecting");
    }
}
