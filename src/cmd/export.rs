use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use boxreel::annotate::{
    BoxCompositor, ExportPipeline, ExportRange, ExportState, FfmpegRenderer, LabelOverlay,
};
use boxreel::AppConfig;

pub struct ExportArgs {
    pub video: PathBuf,
    pub detections: PathBuf,
    pub output: PathBuf,
    pub full: bool,
    pub max_span: Option<f64>,
    pub max_boxes: Option<usize>,
    pub line_width: Option<f64>,
    pub labels: bool,
    pub no_audio: bool,
    pub library: Option<PathBuf>,
    pub hwaccel: bool,
}

pub async fn cmd_export(args: ExportArgs, config: AppConfig) -> Result<()> {
    let AppConfig {
        export: mut export_config,
        compositor: mut compositor_config,
        mut encoder,
        ..
    } = config.clone();

    if let Some(span) = args.max_span {
        export_config.max_chunk_secs = span;
    }
    if args.no_audio {
        export_config.audio = false;
    }
    if args.library.is_some() {
        export_config.library_dir = args.library.clone();
    }
    if let Some(n) = args.max_boxes {
        compositor_config = compositor_config.with_max_boxes(n);
    }
    if let Some(w) = args.line_width {
        compositor_config = compositor_config.with_line_width(w);
    }
    if args.labels {
        compositor_config = compositor_config.with_labels(true);
    }
    if args.hwaccel {
        #[cfg(target_os = "macos")]
        {
            encoder = encoder.with_hwaccel("videotoolbox");
        }
        #[cfg(not(target_os = "macos"))]
        {
            encoder = encoder.with_hwaccel("nvenc");
        }
    }

    eprintln!("🎬 Exporting: {}", args.video.display());

    let asset = super::probe_video(&args.video, &config).await?;
    let store = super::load_detections(&args.detections, &config)?;
    let geometry = encoder.geometry_for(&asset);

    eprintln!(
        "   {}x{} @ {:.2} fps, {}",
        geometry.width,
        geometry.height,
        geometry.fps,
        geometry.orientation
    );
    eprintln!("   Detections: {} in {} seconds", store.len(), store.buckets().len());
    if args.hwaccel {
        eprintln!("   Hardware acceleration: {}", encoder.video_codec);
    }

    let renderer = FfmpegRenderer::new(encoder.clone());
    if !renderer.check_available().await {
        bail!("ffmpeg not found at {}", encoder.ffmpeg_path);
    }

    let compositor = Arc::new(BoxCompositor::new(compositor_config.clone(), geometry.orientation));
    let labels = LabelOverlay::from_config(&compositor_config);
    let pipeline = ExportPipeline::new(asset, store, Arc::new(renderer), compositor)
        .with_geometry(geometry)
        .with_persister(export_config.persister())
        .with_labels(labels)
        .with_config(export_config)
        .with_output_extension(encoder.container.extension());

    let ranges = if args.full {
        vec![ExportRange::full(pipeline.asset().duration).context("video has zero duration")?]
    } else {
        pipeline
            .chunks()
            .context("invalid --max-span or [export] max_chunk_secs")?
    };
    if ranges.is_empty() {
        bail!("no detections fall inside the video; pass --full to export it whole");
    }

    let start = std::time::Instant::now();
    let mut saved = Vec::with_capacity(ranges.len());

    for (i, range) in ranges.iter().enumerate() {
        let output = chunk_output(&args.output, i, ranges.len());
        eprintln!("\n   Chunk {}/{}: {}", i + 1, ranges.len(), range);

        let handle = pipeline.start_to(*range, &output)?;
        let printer = print_progress(handle.subscribe());

        let wait = handle.wait();
        tokio::pin!(wait);
        let state = tokio::select! {
            state = &mut wait => state,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n   Cancelling...");
                pipeline.cancel();
                wait.await
            }
        };
        let _ = printer.await;

        match state {
            ExportState::Completed { output } => {
                eprintln!("   Saved: {}", output.display());
                saved.push(output);
            }
            ExportState::Failed { reason } => {
                return Err(reason).with_context(|| format!("export of {range} failed"));
            }
            other => bail!("export ended in unexpected state: {other}"),
        }
    }

    eprintln!(
        "\n✅ Exported {} chunk(s) in {:.1}s",
        saved.len(),
        start.elapsed().as_secs_f64()
    );
    for path in &saved {
        println!("{}", path.display());
    }

    Ok(())
}

/// `out.mp4` for a single chunk, `out-chunk1.mp4`, `out-chunk2.mp4`… otherwise.
fn chunk_output(base: &Path, index: usize, count: usize) -> PathBuf {
    if count <= 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map_or_else(|| "export".to_string(), |s| s.to_string_lossy().to_string());
    let name = match base.extension() {
        Some(ext) => format!("{stem}-chunk{}.{}", index + 1, ext.to_string_lossy()),
        None => format!("{stem}-chunk{}", index + 1),
    };
    base.with_file_name(name)
}

/// Print progress until the session is terminal.
fn print_progress(mut updates: watch::Receiver<ExportState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if let ExportState::Exporting { progress } = state {
                eprint!("\r   {:>3.0}%", progress * 100.0);
            } else if state.is_terminal() {
                eprintln!();
                break;
            }
        }
    })
}
