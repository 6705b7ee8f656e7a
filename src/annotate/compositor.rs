//! Per-frame box burn-in
//!
//! The renderer hands every decoded frame to a [`FrameCompositor`] together
//! with its presentation time. [`BoxCompositor`] looks up the detections for
//! that second and strokes their outlines straight into the RGBA bytes.
//!
//! A frame that cannot be locked for writing is passed through undrawn:
//! losing an annotation is acceptable, losing a frame is not.

use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::debug;

use super::detection::{bucket_for, DetectionStore};
use super::transform::{CoordinateTransformer, Orientation, PixelRect};

/// Why a frame could not be drawn on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferLockError {
    #[error("pixel buffer is read-only")]
    ReadOnly,

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Decoded RGBA frame (4 bytes per pixel, no row padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
    read_only: bool,
}

impl PixelBuffer {
    /// Zero-filled (transparent black) buffer.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_rgba(width, height, vec![0; Self::frame_len(width, height)])
    }

    /// Wrap raw RGBA bytes. The length is checked when the buffer is locked.
    #[must_use]
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            read_only: false,
        }
    }

    #[must_use]
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_rgba(width, height, image.into_raw())
    }

    /// Bytes needed for one frame of the given size.
    #[must_use]
    pub fn frame_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// Mark the buffer as shared with another consumer; locking will fail.
    #[must_use]
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Owned image copy, `None` if the byte length does not match the size.
    #[must_use]
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Writable view over the pixels.
    pub fn lock_for_writing(&mut self) -> Result<ImageBuffer<Rgba<u8>, &mut [u8]>, BufferLockError> {
        if self.read_only {
            return Err(BufferLockError::ReadOnly);
        }
        let expected = Self::frame_len(self.width, self.height);
        let actual = self.data.len();
        ImageBuffer::from_raw(self.width, self.height, self.data.as_mut_slice())
            .filter(|_| actual == expected)
            .ok_or(BufferLockError::SizeMismatch { expected, actual })
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// Nothing to draw; bytes untouched.
    Untouched,
    /// This many outlines were stroked.
    Drawn(usize),
    /// Detections existed but the buffer could not be locked.
    Skipped(BufferLockError),
}

/// Capability the renderer calls once per output frame.
///
/// Implementations must return promptly and only mutate pixels.
pub trait FrameCompositor: Send + Sync {
    fn compose(
        &self,
        buffer: &mut PixelBuffer,
        presentation_time: f64,
        store: &DetectionStore,
    ) -> ComposeOutcome;
}

/// Outline settings for burned-in boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Detections drawn per frame, first N in recording order
    pub max_boxes: usize,
    /// Stroke width in render pixels, centred on the box edge
    pub line_width: f64,
    /// Also burn `confidence_text` above each box (applied by the encoder)
    pub burn_labels: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_boxes: 3,
            line_width: 10.0,
            burn_labels: false,
        }
    }
}

impl CompositorConfig {
    #[must_use]
    pub fn with_max_boxes(mut self, max_boxes: usize) -> Self {
        self.max_boxes = max_boxes;
        self
    }

    #[must_use]
    pub fn with_line_width(mut self, line_width: f64) -> Self {
        self.line_width = line_width;
        self
    }

    #[must_use]
    pub fn with_labels(mut self, enabled: bool) -> Self {
        self.burn_labels = enabled;
        self
    }
}

/// Strokes detection outlines in the detection's colour.
#[derive(Debug, Clone)]
pub struct BoxCompositor {
    config: CompositorConfig,
    orientation: Orientation,
}

impl BoxCompositor {
    #[must_use]
    pub fn new(config: CompositorConfig, orientation: Orientation) -> Self {
        Self {
            config,
            orientation,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }
}

impl FrameCompositor for BoxCompositor {
    fn compose(
        &self,
        buffer: &mut PixelBuffer,
        presentation_time: f64,
        store: &DetectionStore,
    ) -> ComposeOutcome {
        let bucket = bucket_for(presentation_time);

        // Copy out the few boxes we need so the store lock is not held while drawing.
        let boxes: Vec<_> = store.with_bucket(bucket, |detections| {
            detections
                .iter()
                .take(self.config.max_boxes)
                .filter(|d| !d.normalized_box.is_empty())
                .map(|d| (d.normalized_box, d.color))
                .collect()
        });
        if boxes.is_empty() {
            return ComposeOutcome::Untouched;
        }

        let transformer =
            CoordinateTransformer::new(buffer.width(), buffer.height(), self.orientation);

        let mut pixels = match buffer.lock_for_writing() {
            Ok(pixels) => pixels,
            Err(e) => {
                debug!(presentation_time, error = %e, "frame passed through undrawn");
                return ComposeOutcome::Skipped(e);
            }
        };

        let mut drawn = 0;
        for (rect, color) in &boxes {
            let rect = transformer.to_render_rect(rect);
            if stroke_rect(&mut pixels, &rect, Rgba(color.to_rgba()), self.config.line_width) {
                drawn += 1;
            }
        }

        if drawn == 0 {
            ComposeOutcome::Untouched
        } else {
            ComposeOutcome::Drawn(drawn)
        }
    }
}

/// Stroke `rect` with a `line_width` band centred on its edges, clipped to the image.
///
/// Returns `false` when nothing was painted.
pub fn stroke_rect<C>(
    image: &mut ImageBuffer<Rgba<u8>, C>,
    rect: &PixelRect,
    color: Rgba<u8>,
    line_width: f64,
) -> bool
where
    C: Deref<Target = [u8]> + DerefMut,
{
    if rect.is_empty() || line_width <= 0.0 {
        return false;
    }

    let (w, h) = image.dimensions();
    let clamp_x = |v: f64| v.clamp(0.0, f64::from(w)) as u32;
    let clamp_y = |v: f64| v.clamp(0.0, f64::from(h)) as u32;
    let half = line_width / 2.0;

    // Outer edge of the band, exclusive upper bounds.
    let (ox0, ox1) = (clamp_x((rect.x - half).floor()), clamp_x((rect.max_x() + half).ceil()));
    let (oy0, oy1) = (clamp_y((rect.y - half).floor()), clamp_y((rect.max_y() + half).ceil()));
    if ox0 >= ox1 || oy0 >= oy1 {
        return false;
    }

    // Inner hole; collapses to nothing when the stroke is wider than the box.
    let (ix0, ix1) = ((rect.x + half).ceil(), (rect.max_x() - half).floor());
    let (iy0, iy1) = ((rect.y + half).ceil(), (rect.max_y() - half).floor());
    let hollow = ix0 < ix1 && iy0 < iy1;
    let (ix0, ix1) = (clamp_x(ix0), clamp_x(ix1));
    let (iy0, iy1) = (clamp_y(iy0), clamp_y(iy1));

    let mut painted = false;
    for y in oy0..oy1 {
        let (left, right) = if hollow && (iy0..iy1).contains(&y) {
            (ox0..ix0.min(ox1), ix1.max(ox0)..ox1)
        } else {
            (ox0..ox1, 0..0)
        };
        for x in left.chain(right) {
            image.put_pixel(x, y, color);
            painted = true;
        }
    }
    painted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::detection::{BoxColor, Detection, NormalizedRect};

    const GREEN: BoxColor = BoxColor::rgb(0, 255, 0);

    fn gray_frame(w: u32, h: u32) -> PixelBuffer {
        PixelBuffer::from_rgba(w, h, vec![128; PixelBuffer::frame_len(w, h)])
    }

    fn pixel(buffer: &PixelBuffer, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * buffer.width() as usize + x as usize) * 4;
        buffer.as_bytes()[i..i + 4].try_into().unwrap()
    }

    fn compositor(line_width: f64) -> BoxCompositor {
        BoxCompositor::new(
            CompositorConfig::default().with_line_width(line_width),
            Orientation::Upright,
        )
    }

    #[test]
    fn test_no_detections_leaves_buffer_identical() {
        let store = DetectionStore::new();
        store.record(7, Detection::new("person", NormalizedRect::unit(), GREEN));

        let original = gray_frame(64, 48);
        let mut frame = original.clone();
        let outcome = compositor(10.0).compose(&mut frame, 3.5, &store);

        assert_eq!(outcome, ComposeOutcome::Untouched);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_outline_only_no_fill() {
        let store = DetectionStore::new();
        // Pixel rect (20, 100, 40, 40) on a 160x160 frame.
        store.record(
            3,
            Detection::new("person", NormalizedRect::new(0.125, 0.125, 0.25, 0.25), GREEN),
        );

        let mut frame = gray_frame(160, 160);
        let outcome = compositor(2.0).compose(&mut frame, 3.2, &store);
        assert_eq!(outcome, ComposeOutcome::Drawn(1));

        let green = GREEN.to_rgba();
        let gray = [128; 4];
        assert_eq!(pixel(&frame, 19, 99), green);
        assert_eq!(pixel(&frame, 20, 120), green);
        assert_eq!(pixel(&frame, 60, 120), green);
        assert_eq!(pixel(&frame, 40, 140), green);
        assert_eq!(pixel(&frame, 40, 120), gray);
        assert_eq!(pixel(&frame, 61, 120), gray);
        assert_eq!(pixel(&frame, 18, 120), gray);
    }

    #[test]
    fn test_draws_at_most_max_boxes_in_recorded_order() {
        let store = DetectionStore::new();
        let colors = [
            BoxColor::rgb(255, 0, 0),
            BoxColor::rgb(0, 255, 0),
            BoxColor::rgb(0, 0, 255),
            BoxColor::rgb(255, 255, 0),
        ];
        for (i, color) in colors.iter().enumerate() {
            let x = 0.05 + 0.2 * i as f64;
            store.record(0, Detection::new("person", NormalizedRect::new(x, 0.4, 0.1, 0.2), *color));
        }

        let mut frame = gray_frame(200, 100);
        let outcome = compositor(2.0).compose(&mut frame, 0.0, &store);
        assert_eq!(outcome, ComposeOutcome::Drawn(3));

        // Left edge of each box at x = 200 * (0.05 + 0.2 i), row y = 50.
        assert_eq!(pixel(&frame, 10, 50), colors[0].to_rgba());
        assert_eq!(pixel(&frame, 50, 50), colors[1].to_rgba());
        assert_eq!(pixel(&frame, 90, 50), colors[2].to_rgba());
        assert_eq!(pixel(&frame, 130, 50), [128; 4]);
    }

    #[test]
    fn test_read_only_buffer_passes_through() {
        let store = DetectionStore::new();
        store.record(1, Detection::new("person", NormalizedRect::unit(), GREEN));

        let original = gray_frame(16, 16).into_read_only();
        let mut frame = original.clone();
        let outcome = compositor(4.0).compose(&mut frame, 1.0, &store);

        assert_eq!(outcome, ComposeOutcome::Skipped(BufferLockError::ReadOnly));
        assert_eq!(frame, original);
    }

    #[test]
    fn test_truncated_buffer_is_not_drawn() {
        let store = DetectionStore::new();
        store.record(1, Detection::new("person", NormalizedRect::unit(), GREEN));

        let mut frame = PixelBuffer::from_rgba(16, 16, vec![0; 100]);
        let outcome = compositor(4.0).compose(&mut frame, 1.9, &store);
        assert!(matches!(
            outcome,
            ComposeOutcome::Skipped(BufferLockError::SizeMismatch { expected: 1024, actual: 100 })
        ));
        assert!(frame.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_zero_area_box_not_drawn() {
        let store = DetectionStore::new();
        store.record(2, Detection::new("person", NormalizedRect::new(0.5, 0.5, 0.0, 0.3), GREEN));

        let original = gray_frame(32, 32);
        let mut frame = original.clone();
        assert_eq!(compositor(4.0).compose(&mut frame, 2.0, &store), ComposeOutcome::Untouched);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_rotated_frame_uses_render_space() {
        let store = DetectionStore::new();
        // Bottom-left quadrant of a 40x20 source; rendered 20x40 rotated clockwise
        // it becomes the top-left 10x20 block.
        store.record(0, Detection::new("person", NormalizedRect::new(0.0, 0.0, 0.5, 0.5), GREEN));

        let compositor = BoxCompositor::new(
            CompositorConfig::default().with_line_width(2.0),
            Orientation::Rotated90Cw,
        );
        let mut frame = gray_frame(20, 40);
        assert_eq!(compositor.compose(&mut frame, 0.5, &store), ComposeOutcome::Drawn(1));

        assert_eq!(pixel(&frame, 0, 0), GREEN.to_rgba());
        assert_eq!(pixel(&frame, 10, 5), GREEN.to_rgba());
        assert_eq!(pixel(&frame, 5, 10), [128; 4]);
        assert_eq!(pixel(&frame, 15, 30), [128; 4]);
    }

    #[test]
    fn test_stroke_clipped_to_image() {
        let mut image = RgbaImage::new(10, 10);
        // The whole band lies outside a 10x10 image.
        let painted = stroke_rect(
            &mut image,
            &PixelRect::new(-5.0, -5.0, 30.0, 30.0),
            Rgba([255, 0, 0, 255]),
            4.0,
        );
        assert!(!painted);
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 0]));

        let painted = stroke_rect(&mut image, &PixelRect::new(2.0, 2.0, 6.0, 6.0), Rgba([1, 2, 3, 255]), 2.0);
        assert!(painted);
        assert_eq!(image.get_pixel(1, 1).0, [1, 2, 3, 255]);
        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0, 0]);
    }
}
