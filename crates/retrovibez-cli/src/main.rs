//! retrovibez - reversal analysis pipeline CLI
//!
//! ## Commands
//!
//! - `run`: analyze selected tracks of a dataset and write the output tree
//! - `tracks`: show the detected dataset layout and available tracks
//! - `check`: verify that the analysis engine and report renderer can start

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use retrovibez_core::{init_tracing, locate};
use retrovibez_pipeline::{
    CommandRunner, CommandSpec, Pipeline, PipelineConfig, ReportConfig, RunRequest, RunStatus,
    REPORT_PLACEHOLDER,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{info, warn, Level};

/// Exit status after a second Ctrl-C abandons the run (128 + SIGINT).
const INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "retrovibez")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reversal detection pipeline for tracked larvae", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline config file (TOML)
    #[arg(short, long, global = true, env = "RETROVIBEZ_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze tracks and write results, figures and the report source
    Run {
        /// Dataset root (experiment directory or track container)
        dataset: PathBuf,

        /// Tracks to analyze: "all", or ids and ranges like "1,3,5-8"
        #[arg(short, long, default_value = "all")]
        tracks: String,

        /// Output directory (default: retrovibez_results_<timestamp> next to the dataset)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Figure workers (0 = one per CPU)
        #[arg(long)]
        workers: Option<usize>,

        /// Per-track engine timeout in seconds (0 = none)
        #[arg(long)]
        engine_timeout: Option<u64>,

        /// Skip figure generation
        #[arg(long)]
        no_figures: bool,
    },

    /// Show the detected layout and the tracks a dataset provides
    Tracks {
        /// Dataset root
        dataset: PathBuf,
    },

    /// Check that the configured engine and renderer can be started
    Check,
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Overrides {
    workers: Option<usize>,
    engine_timeout: Option<u64>,
    no_figures: bool,
}

impl Overrides {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(workers) = self.workers {
            config.figures.max_workers = workers;
        }
        if let Some(timeout) = self.engine_timeout {
            config.engine.timeout_secs = timeout;
        }
        if self.no_figures {
            config.figures.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            dataset,
            tracks,
            output,
            workers,
            engine_timeout,
            no_figures,
        } => {
            let overrides = Overrides {
                workers,
                engine_timeout,
                no_figures,
            };
            cmd_run(cli.config.as_deref(), &dataset, &tracks, output, &overrides).await
        }
        Commands::Tracks { dataset } => cmd_tracks(&dataset),
        Commands::Check => cmd_check(cli.config.as_deref()).await,
    }
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load_or_default(path)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// `<dataset parent>/retrovibez_results_<YYYYmmdd_HHMMSS>`
fn default_output_dir(dataset: &Path, now: NaiveDateTime) -> PathBuf {
    let parent = dataset
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(format!("retrovibez_results_{}", now.format("%Y%m%d_%H%M%S")))
}

async fn cmd_run(
    config_path: Option<&Path>,
    dataset: &Path,
    tracks: &str,
    output: Option<PathBuf>,
    overrides: &Overrides,
) -> Result<ExitCode> {
    let config = load_config(config_path, overrides)?;
    let output_dir = output.unwrap_or_else(|| default_output_dir(dataset, Local::now().naive_local()));
    let report = config.report.clone();

    let (cancel_tx, cancel_rx) = watch::channel(false);

    println!("Dataset: {}", dataset.display());
    println!("Tracks: {}", tracks);
    println!("Output: {}", output_dir.display());
    println!();

    let request = RunRequest {
        dataset: dataset.to_path_buf(),
        selection: tracks.to_string(),
        output_dir,
    };
    // Dropping the run future kills the in-flight engine (`kill_on_drop`).
    let pipeline = Pipeline::new(config).with_cancel(cancel_rx);
    let outcome = tokio::select! {
        outcome = pipeline.run(&request) => outcome,
        () = interrupted(cancel_tx) => {
            eprintln!("Interrupted again; run abandoned.");
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    println!("Run ID: {}", outcome.run_id);
    println!("Duration: {}ms", outcome.duration_ms);

    match (&outcome.summary, &outcome.error) {
        (Some(summary), _) => {
            println!("Status: ✓ DONE");
            println!();
            for record in &summary.tracks {
                let mark = if record.succeeded() { "✓" } else { "✗" };
                println!(
                    "  {} track {} (analysis: {}, reversals: {}, figures: {})",
                    mark,
                    record.track_id,
                    record.analysis.label(),
                    record.reversal_count,
                    record.figures.label()
                );
            }
            for failure in &summary.failures {
                println!("    track {}: {}", failure.track_id, failure.message);
            }
            println!();
            println!(
                "Summary: {}/{} tracks succeeded, {} reversal events",
                summary.totals.succeeded, summary.totals.total_tracks, summary.totals.total_reversal_events
            );
        }
        (None, Some(error)) => {
            println!("Status: ✗ ABORTED ({})", outcome.final_state());
            println!("Reason: {}", error);
            for result in &outcome.analysis {
                if let Some(message) = result.status.failure_message() {
                    println!("  ✗ track {}: {}", result.track_id, message);
                }
            }
        }
        (None, None) => {}
    }

    if outcome.status == RunStatus::Done {
        if let Some(tree) = &outcome.output {
            println!("Report source: {}", tree.report_source_path().display());
            render_report(&report, &tree.report_source_path(), tree.root()).await;
        }
    }

    Ok(ExitCode::from(outcome.exit_code() as u8))
}

/// Resolves on the second Ctrl-C. The first one asks the pipeline to stop at
/// the next stage boundary.
async fn interrupted(cancel: watch::Sender<bool>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return std::future::pending().await;
    }
    warn!("interrupt received; stopping at the next stage boundary (Ctrl-C again to abandon)");
    let _ = cancel.send(true);
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Substitute the report path into the render command.
fn render_command(report: &ReportConfig, source: &Path) -> Option<Vec<String>> {
    let command = report.render_command.as_ref()?;
    let source = source.display().to_string();
    Some(
        command
            .iter()
            .map(|arg| arg.replace(REPORT_PLACEHOLDER, &source))
            .collect(),
    )
}

/// Run the configured renderer; failures are logged and never fail the run.
async fn render_report(report: &ReportConfig, source: &Path, output_root: &Path) {
    let Some(command) = render_command(report, source) else {
        return;
    };
    let mut spec = CommandSpec::new("report", command, report.render_timeout_secs);
    spec.working_dir = Some(output_root.to_path_buf());

    info!(source = %source.display(), "rendering report");
    match CommandRunner::execute(&spec).await {
        Ok(output) if output.success => {
            println!("Report rendered ({}ms)", output.duration_ms);
        }
        Ok(output) => {
            warn!(exit_code = output.exit_code, diagnostics = %output.diagnostics(), "report renderer failed");
        }
        Err(e) => warn!(error = %e, "report renderer could not run"),
    }
}

fn cmd_tracks(dataset: &Path) -> Result<ExitCode> {
    let located = locate(dataset).with_context(|| format!("inspect {}", dataset.display()))?;

    println!("Detected: {}", located.layout.name());
    println!("Root: {}", located.root.display());
    let ids = located.available();
    match (ids.first(), ids.last()) {
        (Some(first), Some(last)) => {
            println!("Tracks: {} (ids {}-{})", ids.len(), first, last)
        }
        _ => println!("Tracks: 0"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_check(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path, &Overrides::default())?;

    let engine = config
        .engine
        .command
        .first()
        .context("engine.command is empty")?;
    let engine_ok = CommandRunner::is_available(engine).await;
    println!("Engine ({}): {}", engine, if engine_ok { "✓ available" } else { "✗ not found" });

    match config.report.render_command.as_ref().and_then(|cmd| cmd.first()) {
        Some(renderer) => {
            let ok = CommandRunner::is_available(renderer).await;
            println!("Renderer ({}): {}", renderer, if ok { "✓ available" } else { "✗ not found" });
        }
        None => println!("Renderer: (not configured)"),
    }

    Ok(if engine_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
