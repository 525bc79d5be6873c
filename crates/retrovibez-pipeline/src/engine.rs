//! The external analysis engine seam.
//!
//! The engine is a black box that reads one track and writes its artifact.
//! [`CommandEngine`] drives it as a subprocess; tests plug in their own
//! [`AnalysisEngine`] implementations.

use async_trait::async_trait;
use retrovibez_core::TrackDescriptor;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::runner::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// One track for the engine to analyze.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub descriptor: TrackDescriptor,

    /// Where the engine must write the artifact.
    pub artifact: PathBuf,

    /// Per-track results directory (already created).
    pub output_dir: PathBuf,
}

/// The engine ran to exit.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,

    /// Tail of the engine's output for failure messages.
    pub diagnostics: String,
}

impl From<CommandOutput> for EngineOutcome {
    fn from(output: CommandOutput) -> Self {
        Self {
            exit_code: output.exit_code,
            success: output.success,
            duration_ms: output.duration_ms,
            diagnostics: output.diagnostics(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// An in-process engine failed without an exit status.
    #[error("{0}")]
    Internal(String),
}

/// Analyzes one track at a time.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Run the engine for `request`.
    ///
    /// `Ok` means the engine exited, successfully or not; `Err` means it never
    /// produced an exit status (could not start, timed out).
    async fn analyze(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError>;
}

/// Runs the configured command line once per track.
pub struct CommandEngine {
    config: EngineConfig,
}

impl CommandEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Placeholder values for `request`, in the same order as
    /// [`crate::config::ENGINE_PLACEHOLDERS`].
    fn bindings(request: &EngineRequest) -> [(&'static str, String); 6] {
        let descriptor = &request.descriptor;
        [
            ("{track_id}", descriptor.id.to_string()),
            ("{track_path}", descriptor.source_path().display().to_string()),
            ("{track_index}", descriptor.source_index().to_string()),
            ("{layout}", descriptor.layout.name().to_string()),
            ("{output}", request.artifact.display().to_string()),
            ("{output_dir}", request.output_dir.display().to_string()),
        ]
    }

    /// Build the process description for `request`.
    pub fn command_spec(&self, request: &EngineRequest) -> CommandSpec {
        let bindings = Self::bindings(request);
        let command = self
            .config
            .command
            .iter()
            .map(|arg| substitute(arg, &bindings))
            .collect();

        let mut spec = CommandSpec::new(
            format!("engine[{}]", request.descriptor.id),
            command,
            self.config.timeout_secs,
        );
        spec.env = bindings
            .iter()
            .map(|(key, value)| (env_name(key), value.clone()))
            .collect();
        spec.working_dir = self.config.working_dir.clone();
        spec
    }
}

#[async_trait]
impl AnalysisEngine for CommandEngine {
    async fn analyze(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
        let spec = self.command_spec(request);
        let output = CommandRunner::execute(&spec).await?;
        Ok(output.into())
    }
}

/// Replace every placeholder in `arg`.
fn substitute(arg: &str, bindings: &[(&'static str, String)]) -> String {
    bindings
        .iter()
        .fold(arg.to_string(), |acc, (key, value)| acc.replace(key, value))
}

/// `{track_path}` -> `RETROVIBEZ_TRACK_PATH`
fn env_name(placeholder: &str) -> String {
    format!(
        "RETROVIBEZ_{}",
        placeholder.trim_matches(|c| c == '{' || c == '}').to_uppercase()
    )
}
