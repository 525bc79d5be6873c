//! retrovibez core
//!
//! Building blocks of the reversal-analysis pipeline that do not depend on
//! the external engine or on a runtime:
//! - track selection grammar and dataset layout detection
//! - the engine's per-track artifact schema
//! - per-track result types and deterministic run aggregation
//! - output tree paths, atomic writes and the report source document
//! - tracing setup and lifecycle events

pub mod aggregate;
pub mod artifact;
pub mod dataset;
pub mod error;
pub mod obs;
pub mod output;
pub mod report;
pub mod result;
pub mod selection;
pub mod telemetry;
pub mod track;

pub use aggregate::{
    aggregate, FailureStage, FigureRecord, RunSummary, RunTotals, TrackFailure, TrackRecord,
    SUMMARY_SCHEMA_VERSION,
};
pub use artifact::{ArtifactError, ReversalEvent, TrackData, MIN_REVERSAL_SECS};
pub use dataset::{locate, DatasetLayout, LocateError, LocatedDataset, TrackDescriptor, TrackLocator};
pub use error::{RunFatalError, RunResult};
pub use output::{write_atomic, write_json_atomic, OutputTree};
pub use report::{render_report_source, write_report_source};
pub use result::{AnalysisResult, AnalysisStatus, FigureResult, FigureStatus};
pub use selection::{select, SelectionError, TrackItem, TrackSpec};
pub use telemetry::init_tracing;
pub use track::TrackId;

/// retrovibez version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
