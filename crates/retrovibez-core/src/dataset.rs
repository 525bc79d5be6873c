//! Dataset layout detection.
//!
//! A dataset root is classified exactly once per run into one of two
//! layouts, and every selected track gets a [`TrackDescriptor`] that the
//! analysis stage uses without caring which layout produced it.
//!
//! Detection only enumerates what is available. Track payloads are never
//! read: per-track files are listed by name, and the embedded collection is
//! counted with [`IgnoredAny`] so its entries are skipped, not materialized.

use regex::Regex;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

use crate::track::TrackId;

/// Subdirectory some exports nest their data under.
pub const NESTED_DATA_DIR: &str = "matfiles";

/// Suffix that marks a per-track directory (`tracks`, `exp1_tracks`, ...).
pub const TRACKS_DIR_SUFFIX: &str = "tracks";

/// Extension of an embedded-collection container file.
pub const CONTAINER_EXTENSION: &str = "json";

/// On-disk arrangement of track data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetLayout {
    /// One file per track inside a `*tracks` directory.
    SeparateFiles,
    /// Tracks stored as an array inside a single container file.
    Embedded,
}

impl DatasetLayout {
    /// Stable name used in logs, manifests and engine arguments.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetLayout::SeparateFiles => "separate_files",
            DatasetLayout::Embedded => "embedded",
        }
    }
}

/// Where one track lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TrackLocator {
    /// A standalone per-track file.
    File { path: PathBuf },
    /// A 1-based index into the container's track collection.
    Index { container: PathBuf, index: usize },
}

/// Layout-independent handle for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    pub layout: DatasetLayout,
    pub locator: TrackLocator,
}

impl TrackDescriptor {
    /// File the engine has to open for this track.
    pub fn source_path(&self) -> &Path {
        match &self.locator {
            TrackLocator::File { path } => path,
            TrackLocator::Index { container, .. } => container,
        }
    }

    /// Position of the track inside its source (the id itself for per-track files).
    pub fn source_index(&self) -> usize {
        match &self.locator {
            TrackLocator::File { .. } => self.id.get() as usize,
            TrackLocator::Index { index, .. } => *index,
        }
    }
}

/// Result of classifying a dataset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedDataset {
    pub root: PathBuf,
    pub layout: DatasetLayout,
    pub tracks: BTreeMap<TrackId, TrackDescriptor>,
}

impl LocatedDataset {
    /// Ids of every track the dataset provides.
    pub fn available(&self) -> BTreeSet<TrackId> {
        self.tracks.keys().copied().collect()
    }
}

/// Errors produced while locating a dataset.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The root path does not exist.
    #[error("dataset root does not exist: {0}")]
    NotFound(PathBuf),

    /// Neither a tracks directory nor a container with embedded tracks was found.
    #[error("unrecognized dataset layout at {0}")]
    UnrecognizedLayout(PathBuf),

    /// Filesystem access failed while enumerating.
    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience result alias.
pub type LocateResult<T> = std::result::Result<T, LocateError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LocateError + '_ {
    move |source| LocateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn track_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^track(\d+)$").expect("track file pattern is valid"))
}

/// Directories searched for tracks and containers, in priority order.
fn search_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![root.to_path_buf()];
    let nested = root.join(NESTED_DATA_DIR);
    if nested.is_dir() {
        dirs.push(nested);
    }
    dirs
}

/// Sorted entries of `dir` that satisfy `keep`.
fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> LocateResult<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

fn is_tracks_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.to_ascii_lowercase().ends_with(TRACKS_DIR_SUFFIX))
}

/// Per-track files in `dir`, keyed by the id in their `track<N>` stem.
fn enumerate_track_files(dir: &Path) -> LocateResult<BTreeMap<TrackId, PathBuf>> {
    let mut found = BTreeMap::new();
    for path in sorted_entries(dir, |p| p.is_file())? {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| track_file_pattern().captures(stem))
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .and_then(TrackId::new);
        if let Some(id) = id {
            // Sorted input: `track1.json` wins over `track1.mat`.
            found.entry(id).or_insert(path);
        }
    }
    Ok(found)
}

#[derive(Deserialize)]
struct ContainerProbe {
    tracks: Vec<IgnoredAny>,
}

/// Number of embedded tracks, or `None` if `path` is not a track container.
fn probe_container(path: &Path) -> Option<usize> {
    let file = File::open(path).ok()?;
    match serde_json::from_reader::<_, ContainerProbe>(BufReader::new(file)) {
        Ok(probe) => Some(probe.tracks.len()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "not a track container");
            None
        }
    }
}

fn is_container_candidate(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(CONTAINER_EXTENSION))
}

/// First populated `*tracks` directory under `dirs`, plus whether an empty
/// one was passed over. Directories whose name starts with `prefer` are
/// tried first.
fn scan_tracks_dirs(
    dirs: &[PathBuf],
    prefer: Option<&str>,
) -> LocateResult<(Option<BTreeMap<TrackId, PathBuf>>, bool)> {
    let mut empty_tracks_dir = false;
    for dir in dirs {
        let mut candidates = sorted_entries(dir, is_tracks_dir)?;
        if let Some(prefix) = prefer {
            candidates.sort_by_key(|p| {
                !p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
            });
        }
        for tracks_dir in candidates {
            let files = enumerate_track_files(&tracks_dir)?;
            if files.is_empty() {
                empty_tracks_dir = true;
                continue;
            }
            debug!(dir = %tracks_dir.display(), count = files.len(), "found per-track files");
            return Ok((Some(files), empty_tracks_dir));
        }
    }
    Ok((None, empty_tracks_dir))
}

fn separate_files(root: &Path, files: BTreeMap<TrackId, PathBuf>) -> LocatedDataset {
    let tracks = files
        .into_iter()
        .map(|(id, path)| {
            (
                id,
                TrackDescriptor {
                    id,
                    layout: DatasetLayout::SeparateFiles,
                    locator: TrackLocator::File { path },
                },
            )
        })
        .collect();
    LocatedDataset {
        root: root.to_path_buf(),
        layout: DatasetLayout::SeparateFiles,
        tracks,
    }
}

fn embedded(root: &Path, container: &Path, count: usize) -> LocatedDataset {
    let tracks = (1..=count)
        .filter_map(|index| {
            let id = TrackId::new(u32::try_from(index).ok()?)?;
            Some((
                id,
                TrackDescriptor {
                    id,
                    layout: DatasetLayout::Embedded,
                    locator: TrackLocator::Index {
                        container: container.to_path_buf(),
                        index,
                    },
                },
            ))
        })
        .collect();
    LocatedDataset {
        root: root.to_path_buf(),
        layout: DatasetLayout::Embedded,
        tracks,
    }
}

/// Classify `root` and enumerate its tracks.
///
/// Rules, first match wins:
/// 1. a populated `*tracks` directory (in the root or its `matfiles/`) gives
///    [`DatasetLayout::SeparateFiles`];
/// 2. a `*.json` container with a top-level `tracks` array (or `root`
///    itself being such a file) gives [`DatasetLayout::Embedded`];
/// 3. an existing but empty `*tracks` directory gives `SeparateFiles` with
///    no tracks;
/// 4. anything else is [`LocateError::UnrecognizedLayout`].
///
/// A `root` that is a file but not a container is an experiment file; its
/// tracks come from a sibling `*tracks` directory, preferring one named
/// after the file (`exp1.mat` -> `exp1_tracks/`).
pub fn locate(root: &Path) -> LocateResult<LocatedDataset> {
    if !root.exists() {
        return Err(LocateError::NotFound(root.to_path_buf()));
    }

    if root.is_file() {
        if let Some(count) = probe_container(root) {
            return Ok(embedded(root, root, count));
        }
        let parent = root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = root.file_stem().and_then(|s| s.to_str());
        return match scan_tracks_dirs(&[parent.to_path_buf()], stem)? {
            (Some(files), _) => Ok(separate_files(root, files)),
            (None, true) => Ok(separate_files(root, BTreeMap::new())),
            (None, false) => Err(LocateError::UnrecognizedLayout(root.to_path_buf())),
        };
    }

    let dirs = search_dirs(root);

    let (files, empty_tracks_dir) = scan_tracks_dirs(&dirs, None)?;
    if let Some(files) = files {
        return Ok(separate_files(root, files));
    }

    for dir in &dirs {
        for candidate in sorted_entries(dir, is_container_candidate)? {
            if let Some(count) = probe_container(&candidate) {
                debug!(container = %candidate.display(), count, "found embedded tracks");
                return Ok(embedded(root, &candidate, count));
            }
        }
    }

    if empty_tracks_dir {
        return Ok(separate_files(root, BTreeMap::new()));
    }

    Err(LocateError::UnrecognizedLayout(root.to_path_buf()))
}
