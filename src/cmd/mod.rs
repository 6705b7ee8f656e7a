mod chunks;
mod export;
mod preview;
mod probe;

pub use chunks::cmd_chunks;
pub use export::{cmd_export, ExportArgs};
pub use preview::cmd_preview;
pub use probe::cmd_probe;

use std::path::Path;

use anyhow::{Context, Result};

use boxreel::annotate::{load_detection_log, probe_asset, AssetInfo, DetectionFeed, DetectionStore, LabelPalette};
use boxreel::AppConfig;

/// Probe `video` with the configured ffprobe.
async fn probe_video(video: &Path, config: &AppConfig) -> Result<AssetInfo> {
    probe_asset(&config.encoder.ffprobe_path, video)
        .await
        .with_context(|| format!("failed to probe {}", video.display()))
}

/// Replay a detection log into a fresh store using the `[feed]` settings.
fn load_detections(path: &Path, config: &AppConfig) -> Result<DetectionStore> {
    let palette = config
        .feed
        .palette_seed
        .map_or_else(LabelPalette::new, LabelPalette::with_seed);
    let feed = DetectionFeed::new(DetectionStore::new())
        .with_label_filter(Some(config.feed.label_filter.clone()))
        .with_palette(palette);

    load_detection_log(path, &feed)?;
    Ok(feed.store().clone())
}
