//! Pipeline controller.
//!
//! Drives one run through `Init → Selecting → Locating → Analyzing →
//! FigureGen → Aggregating → Done`. Stages never overlap and each one
//! finishes over its whole input before the next begins. A run-fatal error
//! moves the run straight to `Aborted`; per-track failures are recorded and
//! the run carries on with whatever tracks survived.

use chrono::Utc;
use retrovibez_core::obs::{emit_run_aborted, emit_run_finished, emit_run_started, emit_stage_entered, run_span};
use retrovibez_core::{
    aggregate, locate, write_atomic, write_json_atomic, write_report_source, AnalysisResult, FigureResult,
    OutputTree, RunFatalError, RunResult, RunSummary, TrackSpec,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::engine::{AnalysisEngine, CommandEngine};
use crate::figures::{FigureRenderer, FigureScheduler, FigureStage, PlotRenderer};
use crate::invoker::AnalysisInvoker;
use crate::manifest::{AbortInfo, RunManifest, RunStatus, MANIFEST_SCHEMA_VERSION};
use crate::spec::RunSpec;
use crate::stage::PipelineState;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Dataset root (directory or container file).
    pub dataset: PathBuf,

    /// Track selection string (`all`, `1,3,5-7`, ...).
    pub selection: String,

    pub output_dir: PathBuf,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,

    /// Every state entered, ending in `Done` or `Aborted`.
    pub states: Vec<PipelineState>,

    pub spec: Option<RunSpec>,
    pub analysis: Vec<AnalysisResult>,
    pub figures: Vec<FigureResult>,

    /// Present only for `Done` runs.
    pub summary: Option<RunSummary>,

    /// The fatal error for `Aborted` runs.
    pub error: Option<RunFatalError>,

    /// Output tree, once the run got far enough to create it.
    pub output: Option<OutputTree>,

    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Init)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Done => 0,
            RunStatus::Aborted => 1,
        }
    }
}

/// Per-run mutable state, owned by one `run` call.
struct RunProgress {
    state: PipelineState,
    trail: Vec<PipelineState>,
    spec: Option<RunSpec>,
    tree: Option<OutputTree>,
    analysis: Vec<AnalysisResult>,
    figures: Vec<FigureResult>,
}

impl RunProgress {
    fn new() -> Self {
        Self {
            state: PipelineState::Init,
            trail: vec![PipelineState::Init],
            spec: None,
            tree: None,
            analysis: Vec::new(),
            figures: Vec::new(),
        }
    }

    fn enter(&mut self, to: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {} -> {}",
            self.state,
            to
        );
        self.state = to;
        self.trail.push(to);
        emit_stage_entered(to.name());
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    engine: Arc<dyn AnalysisEngine>,
    figures: Arc<dyn FigureStage>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    /// Pipeline with the subprocess engine and the plot renderer from `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let engine = Arc::new(CommandEngine::new(config.engine.clone()));
        let renderer = Arc::new(PlotRenderer::new(&config.figures));
        let figures = Arc::new(FigureScheduler::new(
            renderer,
            config.figures.max_workers,
            config.figures.worker_ceiling,
        ));
        Self {
            config,
            engine,
            figures,
            cancel: None,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn AnalysisEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Replace the figure renderer, keeping the configured pool size.
    pub fn with_renderer(mut self, renderer: Arc<dyn FigureRenderer>) -> Self {
        self.figures = Arc::new(FigureScheduler::new(
            renderer,
            self.config.figures.max_workers,
            self.config.figures.worker_ceiling,
        ));
        self
    }

    /// Stop the run at the next stage boundary once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run. Never fails: fatal errors end up in the outcome.
    pub async fn run(&self, request: &RunRequest) -> RunOutcome {
        let run_id = Uuid::new_v4();
        self.execute(run_id, request)
            .instrument(run_span(&run_id.to_string()))
            .await
    }

    async fn execute(&self, run_id: Uuid, request: &RunRequest) -> RunOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        emit_run_started(
            &run_id.to_string(),
            &request.dataset.display().to_string(),
            &request.selection,
        );

        let mut progress = RunProgress::new();
        let result = self.drive(request, &mut progress).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, summary, error, abort) = match result {
            Ok(summary) => {
                emit_run_finished(duration_ms, summary.totals.total_tracks, summary.totals.failed);
                (RunStatus::Done, Some(summary), None, None)
            }
            Err(err) => {
                let stage = progress.state;
                emit_run_aborted(stage.name(), &err);
                progress.enter(PipelineState::Aborted);
                let abort = AbortInfo::new(stage, &err);
                (RunStatus::Aborted, None, Some(err), Some(abort))
            }
        };

        if let Some(tree) = &progress.tree {
            let manifest = RunManifest {
                schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
                run_id,
                retrovibez_version: retrovibez_core::VERSION.to_string(),
                started_at,
                finished_at: Utc::now(),
                duration_ms,
                status,
                states: progress.trail.clone(),
                selection: request.selection.clone(),
                spec: progress.spec.clone(),
                totals: summary.as_ref().map(|s| s.totals.clone()),
                analysis: if summary.is_none() {
                    progress.analysis.clone()
                } else {
                    Vec::new()
                },
                abort,
            };
            if let Err(e) = manifest.write(&tree.manifest_path()) {
                warn!(error = %e, "failed to write run manifest");
            }
        }

        RunOutcome {
            run_id,
            status,
            states: progress.trail,
            spec: progress.spec,
            analysis: progress.analysis,
            figures: progress.figures,
            summary,
            error,
            output: progress.tree,
            duration_ms,
        }
    }

    async fn drive(&self, request: &RunRequest, progress: &mut RunProgress) -> RunResult<RunSummary> {
        self.checkpoint(progress, PipelineState::Selecting)?;
        let track_spec = TrackSpec::parse(&request.selection)?;

        self.checkpoint(progress, PipelineState::Locating)?;
        let dataset = locate(&request.dataset)?;
        let selected = track_spec.resolve(&dataset.available())?;
        info!(
            layout = dataset.layout.name(),
            root = %dataset.root.display(),
            available = dataset.tracks.len(),
            selected = selected.len(),
            "dataset located"
        );
        progress.spec = Some(RunSpec::new(
            dataset.root.clone(),
            dataset.layout,
            &selected,
            &self.config.engine.command,
        ));

        self.checkpoint(progress, PipelineState::Analyzing)?;
        let tree = OutputTree::new(&request.output_dir);
        tree.create().map_err(output_error)?;
        progress.tree = Some(tree.clone());

        let invoker = AnalysisInvoker::new(Arc::clone(&self.engine));
        for descriptor in selected.iter().filter_map(|id| dataset.tracks.get(id)) {
            let result = invoker.invoke(descriptor, &tree).await;
            progress.analysis.push(result);
        }
        let usable = progress.analysis.iter().filter(|r| r.status.is_ok()).count();
        if usable == 0 {
            return Err(RunFatalError::NoUsableTracks {
                selected: selected.len(),
                failed: progress.analysis.len(),
            });
        }

        self.checkpoint(progress, PipelineState::FigureGen)?;
        progress.figures = if self.config.figures.enabled {
            self.figures.run(&progress.analysis, &tree).await
        } else {
            info!("figure stage disabled");
            Vec::new()
        };
        write_json_atomic(&tree.figures_summary_path(), &progress.figures).map_err(output_error)?;

        self.checkpoint(progress, PipelineState::Aggregating)?;
        let summary = aggregate(&progress.analysis, &progress.figures);
        let json = summary
            .to_json()
            .map_err(|e| RunFatalError::Output(e.to_string()))?;
        write_atomic(&tree.analysis_summary_path(), json.as_bytes()).map_err(output_error)?;
        write_report_source(
            &tree.report_source_path(),
            &summary,
            &tree,
            &self.config.report.title,
        )
        .map_err(output_error)?;

        progress.enter(PipelineState::Done);
        Ok(summary)
    }

    /// Stage boundary: stop if cancelled, otherwise enter `next`.
    fn checkpoint(&self, progress: &mut RunProgress, next: PipelineState) -> RunResult<()> {
        let cancelled = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        if cancelled {
            return Err(RunFatalError::Cancelled {
                stage: next.name().to_string(),
            });
        }
        progress.enter(next);
        Ok(())
    }
}

fn output_error(e: anyhow::Error) -> RunFatalError {
    RunFatalError::Output(format!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, EngineOutcome, EngineRequest};
    use crate::figures::{FigureError, FigureJob};
    use async_trait::async_trait;
    use retrovibez_core::{AnalysisStatus, FigureRecord, SelectionError, TrackId};
    use tempfile::TempDir;

    const ARTIFACT: &str =
        r#"{"time":[0,1,2,3,4],"x":[0,1,2,3,4],"y":[0,0,0,0,0],"dot_product":[1,1,-1,-1,1],"reversals":[{"start_time":0.5,"end_time":3.5}]}"#;

    /// Succeeds for every track except those in `fail`.
    struct FakeEngine {
        fail: Vec<u32>,
    }

    #[async_trait]
    impl AnalysisEngine for FakeEngine {
        async fn analyze(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
            let failed = self.fail.contains(&request.descriptor.id.get());
            if !failed {
                std::fs::write(&request.artifact, ARTIFACT).map_err(|e| EngineError::Internal(e.to_string()))?;
            }
            Ok(EngineOutcome {
                exit_code: i32::from(failed),
                success: !failed,
                duration_ms: 0,
                diagnostics: String::new(),
            })
        }
    }

    struct TouchRenderer;

    impl FigureRenderer for TouchRenderer {
        fn render(&self, job: &FigureJob) -> Result<Vec<PathBuf>, FigureError> {
            let path = job.out_dir.join("trajectory.png");
            std::fs::write(&path, b"png")?;
            Ok(vec![path])
        }
    }

    fn dataset(tmp: &TempDir, ids: &[u32]) -> PathBuf {
        let root = tmp.path().join("dataset");
        let tracks = root.join("tracks");
        std::fs::create_dir_all(&tracks).expect("mkdir");
        for id in ids {
            std::fs::write(tracks.join(format!("track{id}.mat")), b"").expect("write");
        }
        root
    }

    fn pipeline(fail: Vec<u32>) -> Pipeline {
        Pipeline::new(PipelineConfig::default())
            .with_engine(Arc::new(FakeEngine { fail }))
            .with_renderer(Arc::new(TouchRenderer))
    }

    fn request(tmp: &TempDir, dataset: PathBuf, selection: &str) -> RunRequest {
        RunRequest {
            dataset,
            selection: selection.to_string(),
            output_dir: tmp.path().join("out"),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_done() {
        let tmp = TempDir::new().expect("tempdir");
        let root = dataset(&tmp, &[1, 2, 3]);
        let outcome = pipeline(vec![2]).run(&request(&tmp, root, "1-2")).await;

        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(
            outcome.states,
            vec![
                PipelineState::Init,
                PipelineState::Selecting,
                PipelineState::Locating,
                PipelineState::Analyzing,
                PipelineState::FigureGen,
                PipelineState::Aggregating,
                PipelineState::Done,
            ]
        );
        let summary = outcome.summary.as_ref().expect("summary");
        assert_eq!(summary.totals.total_tracks, 2);
        assert_eq!(summary.totals.failed, 1);
        assert_eq!(summary.totals.total_reversal_events, 1);

        let tree = outcome.output.as_ref().expect("tree");
        assert!(tree.analysis_summary_path().is_file());
        assert!(tree.figures_summary_path().is_file());
        assert!(tree.report_source_path().is_file());
        assert!(tree.manifest_path().is_file());
        assert!(tree.figures_dir().join("track1").is_dir());
        assert!(!tree.figures_dir().join("track2").exists());
    }

    #[tokio::test]
    async fn test_malformed_selection_aborts_without_output() {
        let tmp = TempDir::new().expect("tempdir");
        let root = dataset(&tmp, &[1]);
        let req = request(&tmp, root, "1,x");
        let outcome = pipeline(vec![]).run(&req).await;

        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(
            outcome.states,
            vec![PipelineState::Init, PipelineState::Selecting, PipelineState::Aborted]
        );
        assert!(matches!(
            outcome.error,
            Some(RunFatalError::Selection(SelectionError::Malformed { .. }))
        ));
        assert!(!req.output_dir.exists());
    }

    #[tokio::test]
    async fn test_all_tracks_failing_aborts_after_analysis() {
        let tmp = TempDir::new().expect("tempdir");
        let root = dataset(&tmp, &[1, 2]);
        let outcome = pipeline(vec![1, 2]).run(&request(&tmp, root, "all")).await;

        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.final_state(), PipelineState::Aborted);
        assert!(!outcome.states.contains(&PipelineState::FigureGen));
        assert!(matches!(
            outcome.error,
            Some(RunFatalError::NoUsableTracks { selected: 2, failed: 2 })
        ));

        let tree = outcome.output.as_ref().expect("tree");
        assert!(!tree.analysis_summary_path().exists());
        let manifest = RunManifest::load(&tree.manifest_path()).expect("manifest");
        assert_eq!(manifest.status, RunStatus::Aborted);
        assert_eq!(manifest.analysis.len(), 2);
        assert_eq!(
            manifest.abort.map(|a| a.stage),
            Some(PipelineState::Analyzing)
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let tmp = TempDir::new().expect("tempdir");
        let root = dataset(&tmp, &[1]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("receiver alive");

        let outcome = pipeline(vec![]).with_cancel(rx).run(&request(&tmp, root, "all")).await;
        assert!(matches!(
            outcome.error,
            Some(RunFatalError::Cancelled { ref stage }) if stage == "selecting"
        ));
        assert_eq!(outcome.states, vec![PipelineState::Init, PipelineState::Aborted]);
    }

    #[tokio::test]
    async fn test_figures_disabled_records_skipped() {
        let tmp = TempDir::new().expect("tempdir");
        let root = dataset(&tmp, &[1]);
        let mut config = PipelineConfig::default();
        config.figures.enabled = false;
        let outcome = Pipeline::new(config)
            .with_engine(Arc::new(FakeEngine { fail: vec![] }))
            .run(&request(&tmp, root, "1"))
            .await;

        assert_eq!(outcome.status, RunStatus::Done);
        let summary = outcome.summary.expect("summary");
        let record = summary.record(TrackId::new(1).expect("nonzero")).expect("record");
        assert_eq!(record.figures, FigureRecord::Skipped);
        assert!(matches!(record.analysis, AnalysisStatus::Ok { .. }));
        assert_eq!(summary.totals.succeeded, 1);
    }
}
