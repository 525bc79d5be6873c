//! Run manifest (`run.json`).
//!
//! Everything that differs between otherwise identical runs (ids,
//! timestamps, durations) lives here and not in the analysis summary.

use anyhow::Result;
use chrono::{DateTime, Utc};
use retrovibez_core::{write_json_atomic, AnalysisResult, RunFatalError, RunTotals};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::spec::RunSpec;
use crate::stage::PipelineState;

pub const MANIFEST_SCHEMA_VERSION: &str = "1.0";

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Aborted,
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    /// State the run was in when the fatal error occurred.
    pub stage: PipelineState,
    /// Stable error label (see [`RunFatalError::kind`]).
    pub kind: String,
    pub message: String,
}

impl AbortInfo {
    pub fn new(stage: PipelineState, error: &RunFatalError) -> Self {
        Self {
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: String,
    pub run_id: Uuid,
    pub retrovibez_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,

    /// Every state the run entered, in order.
    pub states: Vec<PipelineState>,

    /// Raw selection string as given by the user.
    pub selection: String,

    /// Resolved inputs; absent when the run aborted before they were known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<RunSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<RunTotals>,

    /// Per-track analysis results when the run aborted after analysis, so
    /// the failures stay inspectable without a summary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analysis: Vec<AnalysisResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortInfo>,
}

impl RunManifest {
    /// Write the manifest as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
