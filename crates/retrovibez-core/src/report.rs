//! Report source generation.
//!
//! Produces the Quarto/Markdown document the external renderer turns into
//! PDF/HTML. Layout and styling belong to the renderer; this only lays out
//! the numbers and figure links from a [`RunSummary`].

use anyhow::Result;
use std::path::Path;

use crate::aggregate::{FigureRecord, RunSummary};
use crate::output::{write_atomic, OutputTree};

/// Render the report source for `summary`.
///
/// Figure paths are written relative to the output root so the document
/// can be rendered from inside that directory.
pub fn render_report_source(summary: &RunSummary, tree: &OutputTree, title: &str) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("title: \"{}\"\n", title.replace('"', "'")));
    out.push_str("format:\n  html: default\n  pdf: default\n");
    out.push_str("---\n\n");

    let totals = &summary.totals;
    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "- tracks: {}\n- succeeded: {}\n- failed: {}\n- figures skipped: {}\n- reversal events: {}\n\n",
        totals.total_tracks,
        totals.succeeded,
        totals.failed,
        totals.skipped_figures,
        totals.total_reversal_events
    ));

    out.push_str("## Tracks\n\n");
    out.push_str("| Track | Analysis | Reversals | Rejected | Duration (s) | Figures |\n");
    out.push_str("|---:|---|---:|---:|---:|---|\n");
    for record in &summary.tracks {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.1} | {} |\n",
            record.track_id,
            record.analysis.label(),
            record.reversal_count,
            record.rejected_events,
            record.duration_seconds,
            record.figures.label()
        ));
    }
    out.push('\n');

    if !summary.failures.is_empty() {
        out.push_str("## Failures\n\n");
        for failure in &summary.failures {
            out.push_str(&format!(
                "- track {} ({:?}): {}\n",
                failure.track_id, failure.stage, failure.message
            ));
        }
        out.push('\n');
    }

    for record in &summary.tracks {
        let FigureRecord::Ok { figures } = &record.figures else {
            continue;
        };
        out.push_str(&format!("## Track {}\n\n", record.track_id));
        for figure in figures {
            let rel = tree.relative(figure);
            let label = figure
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("figure");
            out.push_str(&format!("![{}]({})\n\n", label, rel.display()));
        }
    }

    out
}

/// Write the report source to `path`.
pub fn write_report_source(
    path: &Path,
    summary: &RunSummary,
    tree: &OutputTree,
    title: &str,
) -> Result<()> {
    let content = render_report_source(summary, tree, title);
    write_atomic(path, content.as_bytes())
}
