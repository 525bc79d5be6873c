//! Pipeline configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file) is a valid configuration.
//!
//! ```toml
//! [engine]
//! command = ["matlab", "-batch", "retrovibez_track('{track_path}', {track_index}, '{output}')"]
//! timeout_secs = 3600
//!
//! [figures]
//! max_workers = 4
//!
//! [report]
//! render_command = ["quarto", "render", "{report}"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholders substituted into `engine.command`.
pub const ENGINE_PLACEHOLDERS: [&str; 6] = [
    "{track_id}",
    "{track_path}",
    "{track_index}",
    "{layout}",
    "{output}",
    "{output_dir}",
];

/// Placeholder substituted into `report.render_command`.
pub const REPORT_PLACEHOLDER: &str = "{report}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Convenience result alias.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// External analysis engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Per-track timeout in seconds (0 = wait forever).
    pub timeout_secs: u64,

    /// Working directory for the engine process.
    pub working_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "matlab".to_string(),
                "-batch".to_string(),
                "retrovibez_track('{track_path}', {track_index}, '{output}')".to_string(),
            ],
            timeout_secs: 3600,
            working_dir: None,
        }
    }
}

/// Figure stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureConfig {
    /// Run the figure stage at all.
    pub enabled: bool,

    /// Requested worker count (0 = one per hardware thread).
    pub max_workers: usize,

    /// Upper bound on the worker pool regardless of hardware.
    pub worker_ceiling: usize,

    /// Image size in pixels.
    pub width: u32,
    pub height: u32,

    /// Seconds of context drawn before and after each reversal close-up.
    pub closeup_padding_secs: f64,
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 0,
            worker_ceiling: 8,
            width: 1000,
            height: 800,
            closeup_padding_secs: 5.0,
        }
    }
}

/// Report source and optional renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,

    /// Renderer invoked on the report source after a successful run.
    pub render_command: Option<Vec<String>>,

    pub render_timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Reversal Analysis Report".to_string(),
            render_command: None,
            render_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    pub figures: FigureConfig,
    pub report: ReportConfig,
}

impl PipelineConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.command.first().map_or(true, |exe| exe.trim().is_empty()) {
            return Err(ConfigError::Invalid("engine.command must name an executable".into()));
        }
        if self.figures.worker_ceiling == 0 {
            return Err(ConfigError::Invalid("figures.worker_ceiling must be at least 1".into()));
        }
        if self.figures.width < 64 || self.figures.height < 64 {
            return Err(ConfigError::Invalid(format!(
                "figures size {}x{} is below the 64x64 minimum",
                self.figures.width, self.figures.height
            )));
        }
        let padding = self.figures.closeup_padding_secs;
        if !padding.is_finite() || padding < 0.0 {
            return Err(ConfigError::Invalid(
                "figures.closeup_padding_secs must be a non-negative number".into(),
            ));
        }
        if let Some(cmd) = &self.report.render_command {
            if cmd.first().map_or(true, |exe| exe.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "report.render_command must name an executable".into(),
                ));
            }
        }
        Ok(())
    }
}
