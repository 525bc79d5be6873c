//! Track identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Positive integer identifying one tracked subject within a dataset.
///
/// Ordering is numeric, so sets of ids iterate in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u32);

impl TrackId {
    /// Build a track id, rejecting zero.
    pub fn new(value: u32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    /// Raw numeric value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Directory name used for this track in the output tree (`track7`).
    pub fn dir_name(self) -> String {
        format!("track{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
