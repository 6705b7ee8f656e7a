//! Detector feed: turns raw model observations into stored detections
//!
//! The model itself is external. Whatever runs it calls
//! [`DetectionFeed::observe`] once per processed frame; the feed filters by
//! label, formats the confidence text, assigns the per-label colour and
//! appends into the bucket for that frame's second.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use super::detection::{bucket_for, BoxColor, Detection, DetectionStore, NormalizedRect};

/// Label kept when no filter is configured explicitly.
pub const DEFAULT_LABEL_FILTER: &str = "person";

/// One raw model result: best class, its confidence and the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub label: String,
    /// `0.0..=1.0`
    pub confidence: f32,
    pub bounding_box: NormalizedRect,
}

/// `"person 87.5"`
#[must_use]
pub fn confidence_text(label: &str, confidence: f32) -> String {
    format!("{label} {:.1}", confidence * 100.0)
}

/// Session-stable colour per label.
pub struct LabelPalette {
    colors: Mutex<HashMap<String, BoxColor>>,
    rng: Mutex<StdRng>,
}

impl LabelPalette {
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Same labels in the same order get the same colours across runs.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            colors: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Colour for `label`, assigned on first sight.
    pub fn color_for(&self, label: &str) -> BoxColor {
        let mut colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(color) = colors.get(label) {
            return *color;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let color = BoxColor::rgb(rng.gen(), rng.gen(), rng.gen());
        colors.insert(label.to_string(), color);
        color
    }

    /// Colour already assigned to `label`, red if it was never seen.
    pub fn assigned_or_default(&self, label: &str) -> BoxColor {
        let colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        colors.get(label).copied().unwrap_or(BoxColor::RED)
    }
}

impl std::fmt::Debug for LabelPalette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LabelPalette")
            .field("colors", &*colors)
            .finish_non_exhaustive()
    }
}

impl Default for LabelPalette {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for the external detector.
#[derive(Debug)]
pub struct DetectionFeed {
    store: DetectionStore,
    palette: LabelPalette,
    label_filter: Option<String>,
}

impl DetectionFeed {
    /// Feed into `store`, keeping only [`DEFAULT_LABEL_FILTER`] observations.
    #[must_use]
    pub fn new(store: DetectionStore) -> Self {
        Self {
            store,
            palette: LabelPalette::new(),
            label_filter: Some(DEFAULT_LABEL_FILTER.to_string()),
        }
    }

    /// `None` or an empty string keeps every label.
    #[must_use]
    pub fn with_label_filter(mut self, filter: Option<String>) -> Self {
        self.label_filter = filter.filter(|f| !f.is_empty());
        self
    }

    #[must_use]
    pub fn with_palette(mut self, palette: LabelPalette) -> Self {
        self.palette = palette;
        self
    }

    #[must_use]
    pub fn store(&self) -> &DetectionStore {
        &self.store
    }

    #[must_use]
    pub fn palette(&self) -> &LabelPalette {
        &self.palette
    }

    /// Record the matching observations of one frame. Returns how many were kept.
    pub fn observe(&self, presentation_time: f64, observations: &[Observation]) -> usize {
        let bucket = bucket_for(presentation_time);
        let mut kept = 0;

        for obs in observations {
            if self.label_filter.as_ref().is_some_and(|f| *f != obs.label) {
                continue;
            }
            let detection = Detection {
                label: obs.label.clone(),
                confidence_text: confidence_text(&obs.label, obs.confidence),
                normalized_box: obs.bounding_box.clamped(),
                color: self.palette.color_for(&obs.label),
            };
            self.store.record(bucket, detection);
            kept += 1;
        }

        if kept > 0 {
            debug!(presentation_time, bucket, kept, "recorded detections");
        }
        kept
    }
}

/// One line of a detection log.
#[derive(Debug, Clone, Deserialize)]
struct LogLine {
    time: f64,
    label: String,
    #[serde(default = "full_confidence")]
    confidence: f32,
    /// `[x, y, width, height]`, normalized, origin bottom-left
    bbox: [f64; 4],
}

fn full_confidence() -> f32 {
    1.0
}

/// Replay a JSON-lines detection log through `feed`. Returns the number of detections kept.
pub fn load_detection_log(path: &Path, feed: &DetectionFeed) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let kept = parse_detection_log(&content, feed)
        .with_context(|| format!("invalid detection log {}", path.display()))?;
    info!(
        "Loaded {} detections across {} buckets from {}",
        kept,
        feed.store().buckets().len(),
        path.display()
    );
    Ok(kept)
}

fn parse_detection_log(content: &str, feed: &DetectionFeed) -> Result<usize> {
    let mut kept = 0;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: LogLine =
            serde_json::from_str(line).with_context(|| format!("line {}", i + 1))?;
        let [x, y, width, height] = entry.bbox;
        let observation = Observation {
            label: entry.label,
            confidence: entry.confidence,
            bounding_box: NormalizedRect::new(x, y, width, height),
        };
        kept += feed.observe(entry.time, std::slice::from_ref(&observation));
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(label: &str, confidence: f32) -> Observation {
        Observation {
            label: label.to_string(),
            confidence,
            bounding_box: NormalizedRect::new(0.1, 0.2, 0.3, 0.4),
        }
    }

    #[test]
    fn test_confidence_text_format() {
        assert_eq!(confidence_text("person", 0.875), "person 87.5");
        assert_eq!(confidence_text("dog", 1.0), "dog 100.0");
    }

    #[test]
    fn test_observe_filters_labels_and_buckets_by_second() {
        let feed = DetectionFeed::new(DetectionStore::new());
        let kept = feed.observe(4.7, &[obs("person", 0.9), obs("car", 0.99), obs("person", 0.5)]);
        assert_eq!(kept, 2);

        let stored = feed.store().lookup(4);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].confidence_text, "person 90.0");
        assert_eq!(stored[1].confidence_text, "person 50.0");
        assert!(feed.store().lookup(5).is_empty());
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let feed = DetectionFeed::new(DetectionStore::new()).with_label_filter(Some(String::new()));
        assert_eq!(feed.observe(0.0, &[obs("person", 0.9), obs("car", 0.8)]), 2);
    }

    #[test]
    fn test_out_of_range_boxes_are_clamped() {
        let feed = DetectionFeed::new(DetectionStore::new());
        let mut o = obs("person", 0.9);
        o.bounding_box = NormalizedRect::new(0.5, -0.25, 0.75, 0.5);
        feed.observe(1.0, &[o]);
        assert!(feed.store().lookup(1)[0].normalized_box.is_normalized());
    }

    #[test]
    fn test_palette_is_stable_per_label() {
        let palette = LabelPalette::with_seed(7);
        let person = palette.color_for("person");
        let _ = palette.color_for("car");
        assert_eq!(palette.color_for("person"), person);
        assert_eq!(palette.assigned_or_default("person"), person);
        assert_eq!(palette.assigned_or_default("bicycle"), BoxColor::RED);

        let replay = LabelPalette::with_seed(7);
        assert_eq!(replay.color_for("person"), person);
    }

    #[test]
    fn test_feed_debug_lists_assigned_labels() {
        let feed = DetectionFeed::new(DetectionStore::new()).with_palette(LabelPalette::with_seed(1));
        feed.palette().color_for("person");
        let shown = format!("{feed:?}");
        assert!(shown.contains("DetectionFeed"));
        assert!(shown.contains("\"person\""));
    }

    #[test]
    fn test_parse_detection_log() {
        let log = r#"
{"time": 3.2, "label": "person", "confidence": 0.91, "bbox": [0.1, 0.1, 0.2, 0.3]}

{"time": 3.9, "label": "person", "bbox": [0.5, 0.5, 0.1, 0.1]}
{"time": 5.0, "label": "cat", "confidence": 0.7, "bbox": [0.0, 0.0, 1.0, 1.0]}
"#;
        let feed = DetectionFeed::new(DetectionStore::new());
        assert_eq!(parse_detection_log(log, &feed).unwrap(), 2);
        assert_eq!(feed.store().buckets(), vec![3]);
        assert_eq!(feed.store().lookup(3)[1].confidence_text, "person 100.0");
    }

    #[test]
    fn test_parse_detection_log_reports_line() {
        let log = "{\"time\": 1.0, \"label\": \"person\", \"bbox\": [0, 0, 1, 1]}\nnot json\n";
        let feed = DetectionFeed::new(DetectionStore::new());
        let err = parse_detection_log(log, &feed).unwrap_err();
        assert_eq!(err.to_string(), "line 2");
    }

    #[test]
    fn test_load_detection_log_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.jsonl");
        std::fs::write(&path, "{\"time\": 12.5, \"label\": \"person\", \"bbox\": [0, 0, 0.5, 0.5]}\n").unwrap();

        let feed = DetectionFeed::new(DetectionStore::new());
        assert_eq!(load_detection_log(&path, &feed).unwrap(), 1);
        assert_eq!(feed.store().buckets(), vec![12]);
    }
}
