use std::path::Path;

use anyhow::{bail, Context, Result};

use boxreel::annotate::ChunkSelector;
use boxreel::AppConfig;

pub async fn cmd_chunks(
    detections: &Path,
    video: Option<&Path>,
    duration: Option<f64>,
    max_span: Option<f64>,
    config: &AppConfig,
) -> Result<()> {
    let duration = match (duration, video) {
        (Some(d), _) => d,
        (None, Some(v)) => super::probe_video(v, config).await?.duration,
        (None, None) => bail!("either --video or --duration is required"),
    };
    if !(duration.is_finite() && duration > 0.0) {
        bail!("duration must be positive, got {duration}");
    }

    let max_span = max_span.unwrap_or(config.export.max_chunk_secs);
    let selector = ChunkSelector::new(max_span, duration).context("invalid --max-span")?;

    let store = super::load_detections(detections, config)?;
    let ranges = selector.select_from_store(&store);

    if ranges.is_empty() {
        println!("No detections within {duration:.2}s");
        return Ok(());
    }

    let total: f64 = ranges.iter().map(|r| r.duration()).sum();
    for (i, range) in ranges.iter().enumerate() {
        println!("chunk {}: {} ({:.2}s)", i + 1, range, range.duration());
    }
    println!("{} chunks, {:.2}s of {:.2}s", ranges.len(), total, duration);

    Ok(())
}
