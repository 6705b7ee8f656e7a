//! Time-bucketed detection store
//!
//! Detections are grouped under an integer bucket, `floor(seconds)` of the
//! frame they were observed on. The store is shared between the detector
//! callback (writer), the preview loop and the export compositor (readers);
//! the lock lives inside the handle so callers only see `record`/`lookup`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Axis-aligned box in detector space: components in `[0, 1]`, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole frame.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Zero-area boxes are stored but never drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when every edge lies inside the unit square.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        in_unit(self.x)
            && in_unit(self.y)
            && in_unit(self.x + self.width)
            && in_unit(self.y + self.height)
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Intersect with the unit square.
    #[must_use]
    pub fn clamped(&self) -> Self {
        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = (self.x + self.width).clamp(0.0, 1.0);
        let y1 = (self.y + self.height).clamp(0.0, 1.0);
        Self::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }
}

/// Straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoxColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl BoxColor {
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const BLUE: Self = Self::rgb(0, 0, 255);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Bytes in RGBA order, as stored in a [`PixelBuffer`](super::compositor::PixelBuffer).
    #[must_use]
    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// `RRGGBB` hex, the form ffmpeg's `drawtext` accepts after `0x`.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// One recognized object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name
    pub label: String,
    /// Pre-formatted `"<label> <pct>"`
    pub confidence_text: String,
    /// Box in detector space
    pub normalized_box: NormalizedRect,
    /// Per-label colour, stable for the session
    pub color: BoxColor,
}

impl Detection {
    #[must_use]
    pub fn new(label: impl Into<String>, normalized_box: NormalizedRect, color: BoxColor) -> Self {
        let label = label.into();
        Self {
            confidence_text: label.clone(),
            label,
            normalized_box,
            color,
        }
    }

    #[must_use]
    pub fn with_confidence_text(mut self, text: impl Into<String>) -> Self {
        self.confidence_text = text.into();
        self
    }
}

/// Bucket key for a presentation time.
#[must_use]
pub fn bucket_for(seconds: f64) -> i64 {
    seconds.floor() as i64
}

/// Concurrent bucket → detections map.
///
/// Cloning the store clones the handle, not the data.
#[derive(Debug, Clone, Default)]
pub struct DetectionStore {
    buckets: Arc<RwLock<HashMap<i64, Vec<Detection>>>>,
}

impl DetectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the bucket's list, creating it if absent.
    pub fn record(&self, bucket: i64, detection: Detection) {
        // Append-only: a writer that panicked mid-push leaves a valid map.
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        buckets.entry(bucket).or_default().push(detection);
    }

    /// Detections recorded for `bucket`, in recording order. Empty if none.
    #[must_use]
    pub fn lookup(&self, bucket: i64) -> Vec<Detection> {
        self.with_bucket(bucket, <[Detection]>::to_vec)
    }

    /// Borrowing read of a single bucket without copying it out.
    pub fn with_bucket<R>(&self, bucket: i64, f: impl FnOnce(&[Detection]) -> R) -> R {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        f(buckets.get(&bucket).map_or(&[], Vec::as_slice))
    }

    /// Populated buckets, ascending.
    #[must_use]
    pub fn buckets(&self) -> Vec<i64> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<i64> = buckets
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Total number of detections across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, x: f64) -> Detection {
        Detection::new(label, NormalizedRect::new(x, 0.1, 0.2, 0.2), BoxColor::RED)
    }

    #[test]
    fn test_record_preserves_order_within_bucket() {
        let store = DetectionStore::new();
        store.record(3, det("a", 0.1));
        store.record(3, det("b", 0.2));
        store.record(3, det("c", 0.3));

        let labels: Vec<String> = store.lookup(3).into_iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_buckets_are_independent() {
        let store = DetectionStore::new();
        store.record(1, det("one", 0.1));
        let before = store.lookup(1);

        store.record(2, det("two", 0.1));
        store.record(7, det("seven", 0.1));

        assert_eq!(store.lookup(1), before);
        assert_eq!(store.lookup(2).len(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_lookup_missing_bucket_is_empty_and_does_not_create() {
        let store = DetectionStore::new();
        assert!(store.lookup(42).is_empty());
        assert!(store.buckets().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_buckets_sorted_regardless_of_insertion() {
        let store = DetectionStore::new();
        for b in [21, 2, 9, 5] {
            store.record(b, det("p", 0.0));
        }
        assert_eq!(store.buckets(), vec![2, 5, 9, 21]);
    }

    #[test]
    fn test_bucket_for_floors() {
        assert_eq!(bucket_for(0.0), 0);
        assert_eq!(bucket_for(3.999), 3);
        assert_eq!(bucket_for(4.0), 4);
        assert_eq!(bucket_for(-0.5), -1);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let store = DetectionStore::new();
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.record(i % 10, det("p", 0.0));
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut seen = 0;
                for i in 0..500 {
                    seen = seen.max(store.lookup(i % 10).len());
                }
                seen
            })
        };
        writer.join().unwrap();
        assert!(reader.join().unwrap() <= 50);
        assert_eq!(store.len(), 500);
        assert_eq!(store.lookup(0).len(), 50);
    }

    #[test]
    fn test_clamped_intersects_unit_square() {
        let r = NormalizedRect::new(-0.1, 0.9, 0.5, 0.3).clamped();
        assert!((r.x - 0.0).abs() < 1e-12);
        assert!((r.width - 0.4).abs() < 1e-12);
        assert!((r.height - 0.1).abs() < 1e-12);
        assert!(r.is_normalized());
    }

    #[test]
    fn test_color_hex() {
        assert_eq!(BoxColor::rgb(255, 128, 0).to_hex(), "FF8000");
    }
}
