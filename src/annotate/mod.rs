//! Detection-box burn-in and chunked export
//!
//! Burns time-indexed object detections into video frames and exports only
//! the spans of the asset that actually contain detections.
//!
//! # Features
//!
//! - **Detection store** - per-second buckets shared by detector, preview and export
//! - **Orientation-aware mapping** - one affine from detector space to render pixels
//! - **Chunk selection** - sparse buckets coalesced into bounded export ranges
//! - **Frame compositor** - outline strokes written straight into RGBA frames
//! - **Export sessions** - `Idle → Exporting → Completed | Failed` with progress and cancellation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use boxreel::annotate::{
//!     probe_asset, BoxCompositor, CompositorConfig, DetectionFeed, DetectionStore,
//!     EncoderConfig, ExportPipeline, FfmpegRenderer, load_detection_log,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let encoder = EncoderConfig::default();
//!     let asset = probe_asset(&encoder.ffprobe_path, Path::new("input.mov")).await?;
//!
//!     let store = DetectionStore::new();
//!     load_detection_log(Path::new("detections.jsonl"), &DetectionFeed::new(store.clone()))?;
//!
//!     let compositor = Arc::new(BoxCompositor::new(CompositorConfig::default(), asset.orientation()));
//!     let pipeline = ExportPipeline::new(asset, store, Arc::new(FfmpegRenderer::new(encoder)), compositor);
//!
//!     for range in pipeline.chunks()? {
//!         let state = pipeline.start(range)?.wait().await;
//!         println!("{range}: {state}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod compositor;
pub mod detection;
pub mod export;
pub mod feed;
pub mod labels;
pub mod probe;
pub mod renderer;
pub mod state;
pub mod transform;

pub use chunk::{ChunkSelector, ExportRange, InvalidSpan, DEFAULT_MAX_SPAN_SECS};
pub use compositor::{
    stroke_rect, BoxCompositor, BufferLockError, ComposeOutcome, CompositorConfig, FrameCompositor,
    PixelBuffer,
};
pub use detection::{bucket_for, BoxColor, Detection, DetectionStore, NormalizedRect};
pub use export::{
    ExportConfig, ExportHandle, ExportPipeline, KeepInPlace, LibraryPersister, Persister,
};
pub use feed::{load_detection_log, DetectionFeed, LabelPalette, Observation};
pub use labels::LabelOverlay;
pub use probe::{probe_asset, AssetInfo, ProbeError};
pub use renderer::{
    Container, EncoderConfig, FfmpegRenderer, RenderError, RenderGeometry, RenderJob,
    RenderProgress, VideoRenderer,
};
pub use state::{ExportError, ExportState};
pub use transform::{AffineTransform, CoordinateTransformer, Orientation, PixelRect};
