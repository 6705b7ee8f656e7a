//! Chunk selection: which spans of the source are worth exporting
//!
//! Detections are sparse, so instead of re-encoding the whole asset the
//! populated buckets are coalesced into a few bounded ranges.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::detection::DetectionStore;

/// Default upper bound on a single exported chunk, in seconds.
pub const DEFAULT_MAX_SPAN_SECS: f64 = 10.0;

/// Half-open span `[start, end)` of the source, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportRange {
    pub start: f64,
    pub end: f64,
}

impl ExportRange {
    /// `None` unless `end > start`.
    #[must_use]
    pub fn new(start: f64, end: f64) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// The whole asset.
    #[must_use]
    pub fn full(duration: f64) -> Option<Self> {
        Self::new(0.0, duration)
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    #[must_use]
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

impl std::fmt::Display for ExportRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}s - {:.2}s", self.start, self.end)
    }
}

/// A chunk span that cannot bound a range.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("chunk span must be a positive number of seconds, got {0}")]
pub struct InvalidSpan(pub f64);

/// Coalesces populated buckets into disjoint ascending ranges.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSelector {
    max_span: f64,
    asset_duration: f64,
}

impl ChunkSelector {
    /// Fails unless `max_span` is finite and positive.
    pub fn new(max_span: f64, asset_duration: f64) -> Result<Self, InvalidSpan> {
        if !(max_span.is_finite() && max_span > 0.0) {
            return Err(InvalidSpan(max_span));
        }
        Ok(Self {
            max_span,
            asset_duration,
        })
    }

    #[must_use]
    pub fn with_default_span(asset_duration: f64) -> Self {
        Self {
            max_span: DEFAULT_MAX_SPAN_SECS,
            asset_duration,
        }
    }

    #[must_use]
    pub fn max_span(&self) -> f64 {
        self.max_span
    }

    /// Single pass over the buckets in ascending time order.
    ///
    /// A bucket opens `[t, min(t + max_span, duration))` unless the range
    /// opened last already covers it. Input order does not matter.
    pub fn select(&self, buckets: impl IntoIterator<Item = i64>) -> Vec<ExportRange> {
        let mut sorted: Vec<i64> = buckets.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges = Vec::new();
        let mut current_end = f64::NEG_INFINITY;

        for bucket in sorted {
            let t = bucket as f64;
            if t < current_end {
                continue;
            }
            let end = (t + self.max_span).min(self.asset_duration);
            match ExportRange::new(t.max(0.0), end) {
                Some(range) => {
                    current_end = range.end;
                    ranges.push(range);
                }
                None => debug!(bucket, duration = self.asset_duration, "bucket outside asset, skipped"),
            }
        }

        ranges
    }

    pub fn select_from_store(&self, store: &DetectionStore) -> Vec<ExportRange> {
        self.select(store.buckets())
    }
}
