//! Track selection grammar.
//!
//! ```text
//! selection := "all" | item ("," item)*
//! item := N | N "-" M        (inclusive, N <= M)
//! ```
//!
//! Parsing is split in two steps: [`TrackSpec::parse`] checks syntax only,
//! and [`TrackSpec::resolve`] expands the selection against the tracks that are
//! actually present in the dataset. [`select`] does both.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::track::TrackId;

/// Number of ids any `N-M` range may expand to. Datasets holding more
/// tracks than this raise the limit to their own track count.
pub const RANGE_SPAN_FLOOR: usize = 100_000;

/// Errors produced while parsing or resolving a track selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// A token matched neither `N` nor `N-M`.
    #[error("malformed track selection token: '{token}'")]
    Malformed { token: String },

    /// A range whose start is greater than its end.
    #[error("inverted track range {start}-{end}")]
    RangeInverted { start: u32, end: u32 },

    /// A range that would expand to an unreasonable number of ids.
    #[error("track range {start}-{end} spans more than {limit} tracks")]
    RangeTooLarge { start: u32, end: u32, limit: usize },

    /// Resolution produced no tracks.
    #[error("track selection resolved to no tracks")]
    Empty,

    /// Explicitly requested ids that the dataset does not contain.
    #[error("unknown track ids: {}", format_ids(.0))]
    Unknown(Vec<TrackId>),
}

/// Convenience result alias.
pub type SelectionResult<T> = std::result::Result<T, SelectionError>;

fn format_ids(ids: &[TrackId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One comma-separated element of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackItem {
    Single(TrackId),
    Range(TrackId, TrackId),
}

/// A syntactically valid selection, not yet resolved against a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSpec {
    /// Every track the dataset provides.
    All,
    /// An explicit list of ids and ranges, in input order.
    Items(Vec<TrackItem>),
}

fn item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$").expect("track item pattern is valid")
    })
}

fn parse_id(digits: &str, token: &str) -> SelectionResult<TrackId> {
    digits
        .parse::<u32>()
        .ok()
        .and_then(TrackId::new)
        .ok_or_else(|| SelectionError::Malformed {
            token: token.trim().to_string(),
        })
}

impl TrackSpec {
    /// Parse the raw user string. No dataset access.
    pub fn parse(input: &str) -> SelectionResult<Self> {
        if input.trim().eq_ignore_ascii_case("all") {
            return Ok(TrackSpec::All);
        }

        let mut items = Vec::new();
        for token in input.split(',') {
            let caps = item_pattern()
                .captures(token)
                .ok_or_else(|| SelectionError::Malformed {
                    token: token.trim().to_string(),
                })?;

            let start = parse_id(&caps[1], token)?;
            let item = match caps.get(2) {
                None => TrackItem::Single(start),
                Some(end) => {
                    let end = parse_id(end.as_str(), token)?;
                    if start > end {
                        return Err(SelectionError::RangeInverted {
                            start: start.get(),
                            end: end.get(),
                        });
                    }
                    TrackItem::Range(start, end)
                }
            };
            items.push(item);
        }

        Ok(TrackSpec::Items(items))
    }

    /// Expand against the ids present in the dataset.
    ///
    /// `All` can only fail with [`SelectionError::Empty`]; explicit items are
    /// checked against `available` and every missing id is reported. A range
    /// longer than [`RANGE_SPAN_FLOOR`] or the dataset's track count (whichever
    /// is larger) is [`SelectionError::RangeTooLarge`].
    pub fn resolve(&self, available: &BTreeSet<TrackId>) -> SelectionResult<BTreeSet<TrackId>> {
        let selected = match self {
            TrackSpec::All => available.clone(),
            TrackSpec::Items(items) => {
                let limit = available.len().max(RANGE_SPAN_FLOOR);
                let mut requested = BTreeSet::new();
                for item in items {
                    match *item {
                        TrackItem::Single(id) => {
                            requested.insert(id);
                        }
                        TrackItem::Range(start, end) => {
                            let span = (end.get() - start.get()) as usize + 1;
                            if span > limit {
                                return Err(SelectionError::RangeTooLarge {
                                    start: start.get(),
                                    end: end.get(),
                                    limit,
                                });
                            }
                            requested.extend((start.get()..=end.get()).filter_map(TrackId::new));
                        }
                    }
                }

                let unknown: Vec<TrackId> = requested.difference(available).copied().collect();
                if !unknown.is_empty() {
                    return Err(SelectionError::Unknown(unknown));
                }
                requested
            }
        };

        if selected.is_empty() {
            return Err(SelectionError::Empty);
        }
        Ok(selected)
    }
}

/// Parse `spec` and resolve it against `available` in one call.
pub fn select(spec: &str, available: &BTreeSet<TrackId>) -> SelectionResult<BTreeSet<TrackId>> {
    TrackSpec::parse(spec)?.resolve(available)
}
