//! retrovibez pipeline
//!
//! Runs the reversal analysis end to end: resolves the track selection
//! against a located dataset, invokes the external engine once per track,
//! renders figures on a bounded worker pool, and writes the summary, report
//! source and run manifest into a per-run output tree.

pub mod config;
pub mod engine;
pub mod figures;
pub mod invoker;
pub mod manifest;
pub mod pipeline;
pub mod runner;
pub mod spec;
pub mod stage;

pub use config::{ConfigError, EngineConfig, FigureConfig, PipelineConfig, ReportConfig, REPORT_PLACEHOLDER};
pub use engine::{AnalysisEngine, CommandEngine, EngineError, EngineOutcome, EngineRequest};
pub use figures::{
    effective_workers, FigureError, FigureJob, FigureRenderer, FigureScheduler, FigureStage, PlotRenderer,
};
pub use invoker::AnalysisInvoker;
pub use manifest::{AbortInfo, RunManifest, RunStatus};
pub use pipeline::{Pipeline, RunOutcome, RunRequest};
pub use runner::{CommandError, CommandOutput, CommandRunner, CommandSpec};
pub use spec::RunSpec;
pub use stage::PipelineState;
