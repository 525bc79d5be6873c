//! PNG figures for one analyzed track.
//!
//! Draws shapes only (no captions or tick labels) so rendering does not
//! depend on system fonts. Colors along the trajectory encode time relative
//! to this track's own time span.

use plotters::prelude::*;
use retrovibez_core::{ReversalEvent, TrackData};
use std::error::Error;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{FigureError, FigureJob, FigureRenderer};
use crate::config::FigureConfig;

pub const TRAJECTORY_FIGURE: &str = "trajectory.png";
pub const DOT_PRODUCT_FIGURE: &str = "dot_product.png";

type DrawResult = Result<(), Box<dyn Error>>;

/// File name of the close-up for the `k`-th accepted reversal (1-based).
pub fn closeup_name(k: usize) -> String {
    format!("reversal_{k}.png")
}

/// Maps a timestamp onto a color, using only this track's time range.
struct TimeScale {
    start: f64,
    span: f64,
}

impl TimeScale {
    fn for_track(data: &TrackData) -> Self {
        let start = data.time.first().copied().unwrap_or(0.0);
        let span = data.duration_seconds();
        Self { start, span }
    }

    fn color(&self, t: f64) -> HSLColor {
        let frac = if self.span > 0.0 {
            ((t - self.start) / self.span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        // blue at the start of the track, green at the end
        HSLColor(0.66 - 0.33 * frac, 0.8, 0.45)
    }
}

pub struct PlotRenderer {
    width: u32,
    height: u32,
    closeup_padding_secs: f64,
}

impl PlotRenderer {
    pub fn new(config: &FigureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            closeup_padding_secs: config.closeup_padding_secs,
        }
    }

    fn draw_trajectory(
        &self,
        path: &Path,
        data: &TrackData,
        window: Range<usize>,
        reversals: &[ReversalEvent],
        scale: &TimeScale,
    ) -> DrawResult {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root).margin(20).build_cartesian_2d(
            bounds(data.x[window.clone()].iter().copied()),
            bounds(data.y[window.clone()].iter().copied()),
        )?;

        chart.draw_series(segments(data, window.clone()).map(|(a, b)| {
            PathElement::new(
                vec![(data.x[a], data.y[a]), (data.x[b], data.y[b])],
                scale.color(data.time[a]).stroke_width(2),
            )
        }))?;

        for event in reversals {
            let span = data.sample_range(event.start_time, event.end_time);
            let span = span.start.max(window.start)..span.end.min(window.end);
            chart.draw_series(segments(data, span).map(|(a, b)| {
                PathElement::new(
                    vec![(data.x[a], data.y[a]), (data.x[b], data.y[b])],
                    RED.stroke_width(4),
                )
            }))?;
        }

        root.present()?;
        Ok(())
    }

    fn draw_dot_product(&self, path: &Path, data: &TrackData, reversals: &[ReversalEvent]) -> DrawResult {
        let all = 0..data.time.len();
        let time_range = bounds(data.time.iter().copied());
        let value_range = bounds(data.dot_product.iter().copied().chain([0.0]));

        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .build_cartesian_2d(time_range.clone(), value_range.clone())?;

        chart.draw_series(reversals.iter().map(|event| {
            Rectangle::new(
                [
                    (event.start_time, value_range.start),
                    (event.end_time, value_range.end),
                ],
                RED.mix(0.2).filled(),
            )
        }))?;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(time_range.start, 0.0), (time_range.end, 0.0)],
            BLACK.mix(0.6),
        )))?;
        chart.draw_series(segments(data, all).map(|(a, b)| {
            PathElement::new(
                vec![
                    (data.time[a], data.dot_product[a]),
                    (data.time[b], data.dot_product[b]),
                ],
                BLUE.stroke_width(1),
            )
        }))?;

        root.present()?;
        Ok(())
    }
}

impl FigureRenderer for PlotRenderer {
    fn render(&self, job: &FigureJob) -> Result<Vec<PathBuf>, FigureError> {
        let data = TrackData::load(&job.artifact)?;
        let reversals: Vec<ReversalEvent> = data
            .reversals
            .iter()
            .copied()
            .filter(ReversalEvent::is_valid)
            .collect();
        clear_stale_figures(&job.out_dir)?;
        let scale = TimeScale::for_track(&data);
        let mut written = Vec::with_capacity(reversals.len() + 2);

        let trajectory = job.out_dir.join(TRAJECTORY_FIGURE);
        self.draw_trajectory(&trajectory, &data, 0..data.time.len(), &reversals, &scale)
            .map_err(render_error(&trajectory))?;
        written.push(trajectory);

        let dot_product = job.out_dir.join(DOT_PRODUCT_FIGURE);
        self.draw_dot_product(&dot_product, &data, &reversals)
            .map_err(render_error(&dot_product))?;
        written.push(dot_product);

        for (k, event) in reversals.iter().enumerate() {
            let closeup = job.out_dir.join(closeup_name(k + 1));
            let window = data.sample_range(
                event.start_time - self.closeup_padding_secs,
                event.end_time + self.closeup_padding_secs,
            );
            self.draw_trajectory(&closeup, &data, window, std::slice::from_ref(event), &scale)
                .map_err(render_error(&closeup))?;
            written.push(closeup);
        }

        debug!(track_id = %job.track_id, figures = written.len(), "rendered figures");
        Ok(written)
    }
}

fn render_error(path: &Path) -> impl Fn(Box<dyn Error>) -> FigureError + '_ {
    move |e| FigureError::Render(format!("{}: {e}", path.display()))
}

/// Remove PNGs left by a previous run so the directory only holds this run's figures.
fn clear_stale_figures(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "png") && path.is_file() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Consecutive index pairs in `window` whose points are all finite.
fn segments(data: &TrackData, window: Range<usize>) -> impl Iterator<Item = (usize, usize)> + '_ {
    let end = window.end.min(data.time.len());
    (window.start..end.saturating_sub(1))
        .map(|i| (i, i + 1))
        .filter(move |&(a, b)| {
            [a, b].iter().all(|&i| {
                data.time[i].is_finite()
                    && data.x[i].is_finite()
                    && data.y[i].is_finite()
                    && data.dot_product[i].is_finite()
            })
        })
}

/// Padded axis range covering the finite `values`.
fn bounds(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return 0.0..1.0;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    (lo - pad)..(hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrovibez_core::TrackId;
    use tempfile::TempDir;

    fn track() -> TrackData {
        let time: Vec<f64> = (0..200).map(|i| i as f64 * 0.1).collect();
        TrackData {
            x: time.iter().map(|t| t.cos() * 10.0).collect(),
            y: time.iter().map(|t| t.sin() * 10.0).collect(),
            dot_product: time.iter().map(|t| (t * 0.5).sin()).collect(),
            reversals: vec![
                ReversalEvent {
                    start_time: 3.0,
                    end_time: 7.5,
                },
                ReversalEvent {
                    start_time: 10.0,
                    end_time: 11.0,
                },
                ReversalEvent {
                    start_time: 12.0,
                    end_time: 16.0,
                },
            ],
            time,
        }
    }

    fn job(tmp: &TempDir, data: &TrackData) -> FigureJob {
        let artifact = tmp.path().join("track_data.json");
        std::fs::write(&artifact, serde_json::to_vec(data).expect("serialize")).expect("write");
        let out_dir = tmp.path().join("figures/track1");
        std::fs::create_dir_all(&out_dir).expect("mkdir");
        FigureJob {
            track_id: TrackId::new(1).expect("nonzero"),
            artifact,
            out_dir,
        }
    }

    fn renderer() -> PlotRenderer {
        PlotRenderer::new(&FigureConfig {
            width: 320,
            height: 240,
            ..FigureConfig::default()
        })
    }

    #[test]
    fn test_renders_one_closeup_per_valid_reversal() {
        let tmp = TempDir::new().expect("tempdir");
        let job = job(&tmp, &track());
        let written = renderer().render(&job).expect("render");

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["trajectory.png", "dot_product.png", "reversal_1.png", "reversal_2.png"]
        );
        assert!(written.iter().all(|p| p.is_file()));
    }

    #[test]
    fn test_stale_figures_are_removed() {
        let tmp = TempDir::new().expect("tempdir");
        let job = job(&tmp, &track());
        let stale = job.out_dir.join("reversal_9.png");
        std::fs::write(&stale, b"old").expect("seed");

        renderer().render(&job).expect("render");
        assert!(!stale.exists());
    }

    #[test]
    fn test_empty_track_still_renders() {
        let tmp = TempDir::new().expect("tempdir");
        let data = TrackData {
            time: vec![],
            x: vec![],
            y: vec![],
            dot_product: vec![],
            reversals: vec![],
        };
        let written = renderer().render(&job(&tmp, &data)).expect("render");
        assert_eq!(written.len(), 2);
    }

    #[test]
    fn test_missing_artifact_fails() {
        let tmp = TempDir::new().expect("tempdir");
        let job = FigureJob {
            track_id: TrackId::new(1).expect("nonzero"),
            artifact: tmp.path().join("absent.json"),
            out_dir: tmp.path().to_path_buf(),
        };
        assert!(matches!(renderer().render(&job), Err(FigureError::Artifact(_))));
    }

    #[test]
    fn test_bounds() {
        assert_eq!(bounds(std::iter::empty()), 0.0..1.0);
        assert_eq!(bounds([2.0, 2.0].into_iter()), 1.5..2.5);
        let r = bounds([0.0, 10.0, f64::NAN].into_iter());
        assert!(r.start < 0.0 && r.end > 10.0);
    }

    #[test]
    fn test_time_scale_is_per_track() {
        let scale = TimeScale { start: 100.0, span: 10.0 };
        assert_eq!(scale.color(100.0).0, 0.66);
        assert!((scale.color(110.0).0 - 0.33).abs() < 1e-9);
        assert_eq!(scale.color(500.0).0, scale.color(110.0).0);
    }
}
