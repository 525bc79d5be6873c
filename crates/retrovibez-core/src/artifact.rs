//! Per-track analysis artifact written by the external engine.
//!
//! The engine owns this schema; the pipeline only reads it. Loading is
//! all-or-nothing: a file that does not parse completely is treated the same
//! as a file that is not there.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::track::TrackId;

/// Shortest interval the engine may report as a reversal, in seconds.
pub const MIN_REVERSAL_SECS: f64 = 3.0;

/// File name of the artifact inside `results/trackN/`.
pub const ARTIFACT_FILE_NAME: &str = "track_data.json";

/// One interval during which the animal crawled backwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReversalEvent {
    pub start_time: f64,
    pub end_time: f64,
}

impl ReversalEvent {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the event honours [`MIN_REVERSAL_SECS`].
    pub fn is_valid(&self) -> bool {
        self.start_time.is_finite()
            && self.end_time.is_finite()
            && self.duration() >= MIN_REVERSAL_SECS
    }
}

/// Time series and events for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackData {
    /// Sample times in seconds.
    pub time: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Heading/velocity agreement; negative while reversing.
    pub dot_product: Vec<f64>,
    #[serde(default)]
    pub reversals: Vec<ReversalEvent>,
}

/// Errors produced while reading an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("artifact series lengths disagree: time={time}, x={x}, y={y}, dot_product={dot}")]
    LengthMismatch {
        time: usize,
        x: usize,
        y: usize,
        dot: usize,
    },
}

/// Convenience result alias.
pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

impl TrackData {
    /// Read and structurally validate an artifact.
    pub fn load(path: &Path) -> ArtifactResult<Self> {
        if !path.is_file() {
            return Err(ArtifactError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read(path)?;
        let data: TrackData = serde_json::from_slice(&raw)?;
        data.check_lengths()?;
        Ok(data)
    }

    fn check_lengths(&self) -> ArtifactResult<()> {
        let n = self.time.len();
        if self.x.len() != n || self.y.len() != n || self.dot_product.len() != n {
            return Err(ArtifactError::LengthMismatch {
                time: n,
                x: self.x.len(),
                y: self.y.len(),
                dot: self.dot_product.len(),
            });
        }
        Ok(())
    }

    /// Recorded span of the track in seconds.
    pub fn duration_seconds(&self) -> f64 {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => 0.0,
        }
    }

    /// Split reversals into accepted events and a count of rejected ones.
    ///
    /// Rejected events are logged; they are never silently counted.
    pub fn validated_reversals(&self, track_id: TrackId) -> (Vec<ReversalEvent>, usize) {
        let mut accepted = Vec::with_capacity(self.reversals.len());
        let mut rejected = 0;
        for event in &self.reversals {
            if event.is_valid() {
                accepted.push(*event);
            } else {
                rejected += 1;
                warn!(
                    track_id = %track_id,
                    start_time = event.start_time,
                    end_time = event.end_time,
                    "rejecting reversal shorter than {MIN_REVERSAL_SECS}s"
                );
            }
        }
        (accepted, rejected)
    }

    /// Indices of samples with `start <= t <= end`.
    pub fn sample_range(&self, start: f64, end: f64) -> std::ops::Range<usize> {
        let lo = self.time.partition_point(|t| *t < start);
        let hi = self.time.partition_point(|t| *t <= end);
        lo..hi.max(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> TrackData {
        TrackData {
            time: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            x: vec![0.0, 1.0, 2.0, 1.5, 1.0, 2.0],
            y: vec![0.0; 6],
            dot_product: vec![1.0, 1.0, -1.0, -1.0, -1.0, 1.0],
            reversals: vec![
                ReversalEvent {
                    start_time: 1.5,
                    end_time: 4.5,
                },
                ReversalEvent {
                    start_time: 0.0,
                    end_time: 1.0,
                },
            ],
        }
    }

    #[test]
    fn test_reversal_minimum_duration() {
        let ok = ReversalEvent {
            start_time: 10.0,
            end_time: 13.0,
        };
        let short = ReversalEvent {
            start_time: 10.0,
            end_time: 12.5,
        };
        assert!(ok.is_valid());
        assert!(!short.is_valid());
    }

    #[test]
    fn test_validated_reversals_rejects_short_events() {
        let id = TrackId::new(1).expect("nonzero");
        let (accepted, rejected) = sample().validated_reversals(id);
        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_duration_seconds() {
        assert_eq!(sample().duration_seconds(), 5.0);
        let empty = TrackData {
            time: vec![],
            x: vec![],
            y: vec![],
            dot_product: vec![],
            reversals: vec![],
        };
        assert_eq!(empty.duration_seconds(), 0.0);
    }

    #[test]
    fn test_sample_range() {
        let data = sample();
        assert_eq!(data.sample_range(1.5, 4.5), 2..5);
        assert_eq!(data.sample_range(9.0, 10.0), 6..6);
    }

    #[test]
    fn test_load_rejects_truncated_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join(ARTIFACT_FILE_NAME);
        std::fs::write(&path, br#"{"time": [0.0, 1.0], "x": [0.0"#).expect("write");
        assert!(matches!(
            TrackData::load(&path),
            Err(ArtifactError::Malformed(_))
        ));
    }

    #[test]
    fn test_load_rejects_length_mismatch() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join(ARTIFACT_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"time": [0.0, 1.0], "x": [0.0], "y": [0.0, 1.0], "dot_product": [1.0, 1.0]}"#,
        )
        .expect("write");
        assert!(matches!(
            TrackData::load(&path),
            Err(ArtifactError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_load_missing() {
        let tmp = TempDir::new().expect("tempdir");
        assert!(matches!(
            TrackData::load(&tmp.path().join("absent.json")),
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_valid() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join(ARTIFACT_FILE_NAME);
        std::fs::write(&path, serde_json::to_vec(&sample()).expect("serialize")).expect("write");
        assert_eq!(TrackData::load(&path).expect("load"), sample());
    }
}
