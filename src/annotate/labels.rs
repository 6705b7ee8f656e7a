//! Confidence-label burn-in
//!
//! Outlines are stroked per frame by the compositor; the label text is left
//! to the encoder as a chain of ffmpeg `drawtext` filters, one per visible
//! detection, each enabled only for its bucket's second of the chunk.

use serde::{Deserialize, Serialize};

use super::chunk::ExportRange;
use super::compositor::CompositorConfig;
use super::detection::{Detection, DetectionStore};
use super::transform::CoordinateTransformer;

/// Text placement and styling for burned-in labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelOverlay {
    /// Labels per bucket, matching the outline limit
    pub max_boxes: usize,
    pub font_size: u32,
    /// `None` lets ffmpeg pick its default font
    pub font_file: Option<String>,
    /// Gap between the text baseline area and the box top, in pixels
    pub margin: u32,
}

impl Default for LabelOverlay {
    fn default() -> Self {
        Self {
            max_boxes: CompositorConfig::default().max_boxes,
            font_size: 28,
            font_file: None,
            margin: 6,
        }
    }
}

impl LabelOverlay {
    /// Overlay matching the compositor's limits, or `None` when labels are off.
    #[must_use]
    pub fn from_config(config: &CompositorConfig) -> Option<Self> {
        config.burn_labels.then(|| Self {
            max_boxes: config.max_boxes,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn with_font_file(mut self, font_file: Option<String>) -> Self {
        self.font_file = font_file;
        self
    }

    /// `drawtext` chain for every bucket overlapping `range`.
    ///
    /// Enable windows are relative to the start of the chunk, since the
    /// encoder's input timeline starts at zero. `None` if nothing is drawn.
    pub fn filter_chain(
        &self,
        store: &DetectionStore,
        range: &ExportRange,
        transformer: &CoordinateTransformer,
    ) -> Option<String> {
        let first = range.start.floor() as i64;
        let mut filters = Vec::new();

        for bucket in store.buckets() {
            if bucket < first || bucket as f64 >= range.end {
                continue;
            }
            let from = (bucket as f64).max(range.start) - range.start;
            let to = ((bucket + 1) as f64).min(range.end) - range.start;

            store.with_bucket(bucket, |detections| {
                for detection in detections
                    .iter()
                    .take(self.max_boxes)
                    .filter(|d| !d.normalized_box.is_empty())
                {
                    filters.push(self.drawtext(detection, transformer, from, to));
                }
            });
        }

        (!filters.is_empty()).then(|| filters.join(","))
    }

    fn drawtext(
        &self,
        detection: &Detection,
        transformer: &CoordinateTransformer,
        from: f64,
        to: f64,
    ) -> String {
        let rect = transformer.to_render_rect(&detection.normalized_box);
        let x = rect.x.max(0.0).round() as i64;
        // Above the box when there is room, otherwise just inside its top edge.
        let above = rect.y - f64::from(self.font_size + self.margin);
        let y = if above >= 0.0 {
            above.round() as i64
        } else {
            (rect.y.max(0.0) + f64::from(self.margin)).round() as i64
        };

        let mut filter = format!("drawtext=text='{}'", escape_drawtext(&detection.confidence_text));
        if let Some(ref font) = self.font_file {
            filter.push_str(&format!(":fontfile='{}'", escape_drawtext(font)));
        }
        filter.push_str(&format!(
            ":fontsize={}:fontcolor=0x{}:x={x}:y={y}:borderw=2:bordercolor=0x000000:enable='gte(t,{from:.3})*lt(t,{to:.3})'",
            self.font_size,
            detection.color.to_hex(),
        ));
        filter
    }
}

/// Escape text for use inside a single-quoted filter option.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
        .replace('%', "\\%")
        .replace('\n', " ")
}
