//! Output tree layout and durable writes.
//!
//! Every path is a pure function of the output root and a track id, so a
//! re-run into the same directory overwrites instead of duplicating.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::artifact::ARTIFACT_FILE_NAME;
use crate::track::TrackId;

pub const RESULTS_DIR: &str = "results";
pub const FIGURES_DIR: &str = "figures";
pub const ANALYSIS_SUMMARY_FILE: &str = "analysis_summary.json";
pub const FIGURES_SUMMARY_FILE: &str = "summary.json";
pub const REPORT_SOURCE_FILE: &str = "report.qmd";
pub const RUN_MANIFEST_FILE: &str = "run.json";

/// Paths of one run's output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.root.join(FIGURES_DIR)
    }

    /// `results/trackN/`
    pub fn track_results_dir(&self, id: TrackId) -> PathBuf {
        self.results_dir().join(id.dir_name())
    }

    /// `results/trackN/track_data.json`
    pub fn artifact_path(&self, id: TrackId) -> PathBuf {
        self.track_results_dir(id).join(ARTIFACT_FILE_NAME)
    }

    /// `figures/trackN/`
    pub fn track_figures_dir(&self, id: TrackId) -> PathBuf {
        self.figures_dir().join(id.dir_name())
    }

    pub fn analysis_summary_path(&self) -> PathBuf {
        self.results_dir().join(ANALYSIS_SUMMARY_FILE)
    }

    pub fn figures_summary_path(&self) -> PathBuf {
        self.figures_dir().join(FIGURES_SUMMARY_FILE)
    }

    pub fn report_source_path(&self) -> PathBuf {
        self.root.join(REPORT_SOURCE_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(RUN_MANIFEST_FILE)
    }

    /// Create `results/` and `figures/`.
    pub fn create(&self) -> Result<()> {
        for dir in [self.results_dir(), self.figures_dir()] {
            std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
        }
        Ok(())
    }

    /// `path` relative to the output root, for links in reports.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Write `content` so that readers see either the old file or the complete
/// new one, never a prefix.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{:?} has no parent directory", path))?;
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;

    let mut tmp = NamedTempFile::new_in(dir).with_context(|| format!("temp file in {:?}", dir))?;
    tmp.write_all(content)
        .with_context(|| format!("write temp file for {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("persist {:?}", path))?;
    Ok(())
}

/// Write `value` as pretty JSON via [`write_atomic`].
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_vec_pretty(value).context("serialize json")?;
    content.push(b'\n');
    write_atomic(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_deterministic() {
        let tree = OutputTree::new("/out");
        let id = TrackId::new(4).expect("nonzero");
        assert_eq!(
            tree.artifact_path(id),
            PathBuf::from("/out/results/track4/track_data.json")
        );
        assert_eq!(tree.track_figures_dir(id), PathBuf::from("/out/figures/track4"));
        assert_eq!(
            tree.analysis_summary_path(),
            PathBuf::from("/out/results/analysis_summary.json")
        );
        assert_eq!(
            tree.figures_summary_path(),
            PathBuf::from("/out/figures/summary.json")
        );
    }

    #[test]
    fn test_relative_strips_root() {
        let tree = OutputTree::new("/out");
        assert_eq!(
            tree.relative(Path::new("/out/figures/track1/a.png")),
            Path::new("figures/track1/a.png")
        );
        assert_eq!(tree.relative(Path::new("/elsewhere")), Path::new("/elsewhere"));
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("nested/summary.json");
        write_atomic(&path, b"first").expect("write");
        write_atomic(&path, b"second").expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), b"second");

        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .count();
        assert_eq!(leftovers, 1, "temp files must not linger");
    }

    #[test]
    fn test_create_makes_both_dirs() {
        let tmp = TempDir::new().expect("tempdir");
        let tree = OutputTree::new(tmp.path().join("run"));
        tree.create().expect("create");
        assert!(tree.results_dir().is_dir());
        assert!(tree.figures_dir().is_dir());
    }
}
