//! Run inputs and their identity.

use retrovibez_core::{DatasetLayout, TrackId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// What one run analyzes.
///
/// Two runs with equal specs analyze the same tracks with the same engine,
/// so their `input_digest` matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    /// Resolved dataset root.
    pub dataset_root: PathBuf,

    pub layout: DatasetLayout,

    /// Selected ids in ascending order.
    pub track_ids: Vec<TrackId>,

    /// Engine command line before placeholder substitution.
    pub engine_command: Vec<String>,

    /// SHA-256 over the fields above.
    pub input_digest: String,
}

impl RunSpec {
    pub fn new(
        dataset_root: PathBuf,
        layout: DatasetLayout,
        selected: &BTreeSet<TrackId>,
        engine_command: &[String],
    ) -> Self {
        let track_ids: Vec<TrackId> = selected.iter().copied().collect();
        let input_digest = compute_input_digest(&dataset_root, layout, &track_ids, engine_command);
        Self {
            dataset_root,
            layout,
            track_ids,
            engine_command: engine_command.to_vec(),
            input_digest,
        }
    }
}

/// Deterministic digest of the run inputs.
///
/// Fields are NUL-separated so adjacent values cannot run together.
fn compute_input_digest(
    root: &std::path::Path,
    layout: DatasetLayout,
    track_ids: &[TrackId],
    engine_command: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(layout.name().as_bytes());
    hasher.update(b"\0");
    for id in track_ids {
        hasher.update(id.get().to_le_bytes());
    }
    hasher.update(b"\0");
    for arg in engine_command {
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
