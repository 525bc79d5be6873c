//! Per-track analysis invocation.
//!
//! Drives the engine for one track and classifies what it left behind. Every
//! failure becomes an [`AnalysisStatus`] value; nothing here aborts the run.

use retrovibez_core::obs::emit_track_analyzed;
use retrovibez_core::{AnalysisResult, AnalysisStatus, OutputTree, TrackData, TrackDescriptor};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::engine::{AnalysisEngine, EngineRequest};

pub struct AnalysisInvoker {
    engine: Arc<dyn AnalysisEngine>,
}

impl AnalysisInvoker {
    pub fn new(engine: Arc<dyn AnalysisEngine>) -> Self {
        Self { engine }
    }

    /// Analyze one track into `tree`.
    ///
    /// The track's previous artifact is removed first, so a result can only
    /// ever describe output from this invocation.
    pub async fn invoke(&self, descriptor: &TrackDescriptor, tree: &OutputTree) -> AnalysisResult {
        let id = descriptor.id;
        let output_dir = tree.track_results_dir(id);
        let artifact = tree.artifact_path(id);
        let start = Instant::now();

        if let Err(e) = prepare(&output_dir, &artifact) {
            let result = AnalysisResult::failed(
                id,
                AnalysisStatus::EngineFailed {
                    message: format!("could not prepare {}: {e}", output_dir.display()),
                },
                0,
            );
            emit_track_analyzed(id, result.status.label(), 0, 0);
            return result;
        }

        let request = EngineRequest {
            descriptor: descriptor.clone(),
            artifact: artifact.clone(),
            output_dir,
        };
        debug!(track_id = %id, source = %descriptor.source_path().display(), "invoking engine");
        let outcome = self.engine.analyze(&request).await;
        let engine_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(e) => AnalysisResult::failed(
                id,
                AnalysisStatus::EngineFailed {
                    message: e.to_string(),
                },
                engine_ms,
            ),
            Ok(outcome) if !outcome.success => {
                let mut message = format!("engine exited with code {}", outcome.exit_code);
                if !outcome.diagnostics.is_empty() {
                    message.push_str(": ");
                    message.push_str(&outcome.diagnostics);
                }
                AnalysisResult::failed(id, AnalysisStatus::EngineFailed { message }, engine_ms)
            }
            Ok(_) => match TrackData::load(&artifact) {
                Ok(data) => {
                    let (accepted, rejected) = data.validated_reversals(id);
                    AnalysisResult {
                        track_id: id,
                        status: AnalysisStatus::Ok { artifact },
                        reversal_count: accepted.len(),
                        rejected_events: rejected,
                        duration_seconds: data.duration_seconds(),
                        engine_ms,
                    }
                }
                Err(e) => {
                    warn!(track_id = %id, error = %e, "engine exited cleanly without a usable artifact");
                    AnalysisResult::failed(id, AnalysisStatus::Missing, engine_ms)
                }
            },
        };

        emit_track_analyzed(id, result.status.label(), result.reversal_count, engine_ms);
        result
    }
}

fn prepare(output_dir: &std::path::Path, artifact: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    match std::fs::remove_file(artifact) {
        Ok(()) => {
            debug!(path = %artifact.display(), "removed stale artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
