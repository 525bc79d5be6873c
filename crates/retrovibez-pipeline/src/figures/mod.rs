//! Bounded-concurrency figure generation.
//!
//! Only tracks whose analysis is `Ok` get a job. A fixed pool of workers
//! pulls jobs from a shared queue; each job runs on the blocking pool so a
//! panicking renderer only fails its own track. Results are sorted by track
//! id before they are returned, whatever order the jobs finished in.

pub mod plot;

use async_trait::async_trait;
use futures::future::join_all;
use retrovibez_core::obs::emit_track_figures;
use retrovibez_core::{
    AnalysisResult, ArtifactError, FigureResult, FigureStatus, OutputTree, TrackId,
};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use plot::PlotRenderer;

/// Everything one figure job needs; nothing is shared between jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureJob {
    pub track_id: TrackId,
    pub artifact: PathBuf,
    pub out_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum FigureError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("figure io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("render failed: {0}")]
    Render(String),
}

/// Produces every figure for one track.
///
/// Implementations run on blocking threads and must write only inside
/// `job.out_dir`.
pub trait FigureRenderer: Send + Sync {
    fn render(&self, job: &FigureJob) -> Result<Vec<PathBuf>, FigureError>;
}

/// Worker count for `jobs` jobs.
///
/// `requested == 0` means one worker per available hardware thread. The
/// result never exceeds `ceiling` or the number of jobs, and is at least 1.
pub fn effective_workers(requested: usize, ceiling: usize, jobs: usize) -> usize {
    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let wanted = if requested == 0 { hardware } else { requested };
    wanted.min(ceiling).min(jobs).max(1)
}

/// Seam for the pipeline, so the figure stage can be swapped in tests.
#[async_trait]
pub trait FigureStage: Send + Sync {
    async fn run(&self, analysis: &[AnalysisResult], tree: &OutputTree) -> Vec<FigureResult>;
}

pub struct FigureScheduler {
    renderer: Arc<dyn FigureRenderer>,
    max_workers: usize,
    worker_ceiling: usize,
}

impl FigureScheduler {
    pub fn new(renderer: Arc<dyn FigureRenderer>, max_workers: usize, worker_ceiling: usize) -> Self {
        Self {
            renderer,
            max_workers,
            worker_ceiling,
        }
    }

    /// Jobs for every analyzed track, one per track id.
    pub fn jobs(analysis: &[AnalysisResult], tree: &OutputTree) -> Vec<FigureJob> {
        let mut seen = BTreeSet::new();
        let mut jobs: Vec<FigureJob> = analysis
            .iter()
            .filter_map(|result| {
                let artifact = result.artifact()?;
                seen.insert(result.track_id).then(|| FigureJob {
                    track_id: result.track_id,
                    artifact: artifact.clone(),
                    out_dir: tree.track_figures_dir(result.track_id),
                })
            })
            .collect();
        jobs.sort_by_key(|job| job.track_id);
        jobs
    }

    /// Run `jobs` on the worker pool and return results sorted by track id.
    pub async fn run_jobs(&self, jobs: Vec<FigureJob>) -> Vec<FigureResult> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let expected: Vec<TrackId> = jobs.iter().map(|job| job.track_id).collect();
        let workers = effective_workers(self.max_workers, self.worker_ceiling, jobs.len());
        debug!(jobs = jobs.len(), workers, "starting figure workers");

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let results: Arc<Mutex<Vec<FigureResult>>> = Arc::new(Mutex::new(Vec::new()));

        let handles = (0..workers).map(|worker| {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let renderer = Arc::clone(&self.renderer);
            tokio::spawn(async move {
                loop {
                    let Some(job) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let result = run_one(Arc::clone(&renderer), job).await;
                    debug!(worker, track_id = %result.track_id, ok = result.is_ok(), "figure job finished");
                    results.lock().await.push(result);
                }
            })
        });
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "figure worker stopped unexpectedly");
            }
        }

        let mut collected = std::mem::take(&mut *results.lock().await);
        // A worker that died mid-job leaves its track without a result.
        let produced: BTreeSet<TrackId> = collected.iter().map(|r| r.track_id).collect();
        for id in expected {
            if !produced.contains(&id) {
                collected.push(FigureResult::failed(id, "figure job did not report a result"));
            }
        }
        collected.sort_by_key(|result| result.track_id);
        collected
    }
}

#[async_trait]
impl FigureStage for FigureScheduler {
    async fn run(&self, analysis: &[AnalysisResult], tree: &OutputTree) -> Vec<FigureResult> {
        self.run_jobs(Self::jobs(analysis, tree)).await
    }
}

async fn run_one(renderer: Arc<dyn FigureRenderer>, job: FigureJob) -> FigureResult {
    let track_id = job.track_id;
    let joined = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, FigureError> {
        std::fs::create_dir_all(&job.out_dir)?;
        renderer.render(&job)
    })
    .await;

    let result = match joined {
        Ok(Ok(paths)) => FigureResult::ok(track_id, paths),
        Ok(Err(e)) => {
            warn!(track_id = %track_id, error = %e, "figure job failed");
            FigureResult::failed(track_id, e.to_string())
        }
        Err(e) => {
            warn!(track_id = %track_id, error = %e, "figure job panicked");
            FigureResult::failed(track_id, format!("figure job panicked: {e}"))
        }
    };
    let count = match &result.status {
        FigureStatus::Ok { figures } => figures.len(),
        FigureStatus::Failed { .. } => 0,
    };
    emit_track_figures(track_id, result.is_ok(), count);
    result
}
