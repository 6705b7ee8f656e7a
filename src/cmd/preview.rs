use std::path::Path;

use anyhow::{bail, Context, Result};

use boxreel::annotate::{BoxCompositor, ComposeOutcome, FfmpegRenderer, FrameCompositor};
use boxreel::AppConfig;

pub async fn cmd_preview(
    video: &Path,
    detections: &Path,
    at: f64,
    output: &Path,
    config: &AppConfig,
) -> Result<()> {
    let asset = super::probe_video(video, config).await?;
    if !(0.0..asset.duration).contains(&at) {
        bail!("--at {at:.2}s is outside the video (0 - {:.2}s)", asset.duration);
    }

    let store = super::load_detections(detections, config)?;
    let geometry = config.encoder.geometry_for(&asset);
    let renderer = FfmpegRenderer::new(config.encoder.clone());

    let mut frame = renderer
        .extract_frame(video, &geometry, at)
        .await
        .with_context(|| format!("failed to decode frame at {at:.2}s"))?;

    let compositor = BoxCompositor::new(config.compositor.clone(), geometry.orientation);
    let drawn = match compositor.compose(&mut frame, at, &store) {
        ComposeOutcome::Drawn(n) => n,
        ComposeOutcome::Untouched => 0,
        ComposeOutcome::Skipped(e) => bail!("frame could not be drawn on: {e}"),
    };

    let image = frame
        .to_image()
        .context("decoded frame does not match the probed size")?;
    image
        .save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", output.display()))?;

    eprintln!("🖼️  Preview at {at:.2}s: {drawn} boxes");
    eprintln!("   Output: {}", output.display());

    Ok(())
}
