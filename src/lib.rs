//! `boxreel` - Detection-box burn-in and chunked video export
//!
//! # Features
//!
//! - **Detection store**: per-second buckets of normalized boxes, safe to share across tasks
//! - **Orientation correction**: rotated phone footage maps boxes through one composed affine
//! - **Chunked export**: only the spans with detections are re-encoded
//! - **ffmpeg rendering**: decode, compose and encode through piped child processes
//!
//! # Example
//!
//! ```rust,no_run
//! use boxreel::{ChunkSelector, DetectionStore};
//!
//! let store = DetectionStore::new();
//! let ranges = ChunkSelector::with_default_span(30.0).select_from_store(&store);
//! assert!(ranges.is_empty());
//! ```

pub mod annotate;
pub mod config;

pub use annotate::{
    AssetInfo, BoxCompositor, ChunkSelector, CompositorConfig, CoordinateTransformer, Detection,
    DetectionFeed, DetectionStore, EncoderConfig, ExportError, ExportHandle, ExportPipeline,
    ExportRange, ExportState, FfmpegRenderer, FrameCompositor, NormalizedRect, Orientation,
};
pub use config::AppConfig;

/// Version of boxreel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
