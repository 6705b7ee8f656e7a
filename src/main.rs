//! `boxreel` CLI - Burn detection boxes into video and export the annotated spans

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use boxreel::AppConfig;

#[derive(Parser)]
#[command(name = "boxreel")]
#[command(about = "Burn time-indexed detection boxes into video and export the annotated spans")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/boxreel/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show duration, size, frame rate and orientation of a video
    Probe {
        /// Video file
        video: PathBuf,
    },

    /// List the spans that would be exported for a detection log
    Chunks {
        /// JSON-lines detection log
        #[arg(short, long)]
        detections: PathBuf,

        /// Video to take the duration from
        #[arg(long, required_unless_present = "duration", conflicts_with = "duration")]
        video: Option<PathBuf>,

        /// Asset duration in seconds (no ffprobe needed)
        #[arg(long)]
        duration: Option<f64>,

        /// Longest chunk in seconds
        #[arg(long)]
        max_span: Option<f64>,
    },

    /// Export annotated chunks (or the whole video) with boxes burned in
    Export {
        /// Video file
        video: PathBuf,

        /// JSON-lines detection log
        #[arg(short, long)]
        detections: PathBuf,

        /// Output file; numbered per chunk when there are several
        #[arg(short, long)]
        output: PathBuf,

        /// Export the whole video instead of detection chunks
        #[arg(long)]
        full: bool,

        /// Longest chunk in seconds
        #[arg(long)]
        max_span: Option<f64>,

        /// Boxes drawn per frame
        #[arg(long)]
        max_boxes: Option<usize>,

        /// Outline width in pixels
        #[arg(long)]
        line_width: Option<f64>,

        /// Also burn the confidence label above each box
        #[arg(long)]
        labels: bool,

        /// Drop the audio track
        #[arg(long)]
        no_audio: bool,

        /// Move finished exports into this directory
        #[arg(long)]
        library: Option<PathBuf>,

        /// Use hardware acceleration (VideoToolbox on macOS, NVENC elsewhere)
        #[arg(long)]
        hwaccel: bool,
    },

    /// Render one annotated frame to PNG
    Preview {
        /// Video file
        video: PathBuf,

        /// JSON-lines detection log
        #[arg(short, long)]
        detections: PathBuf,

        /// Presentation time in seconds
        #[arg(long)]
        at: f64,

        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match cli.config {
        Some(ref path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Probe { video } => {
            cmd::cmd_probe(&video, &config).await?;
        }
        Commands::Chunks {
            detections,
            video,
            duration,
            max_span,
        } => {
            cmd::cmd_chunks(&detections, video.as_deref(), duration, max_span, &config).await?;
        }
        Commands::Export {
            video,
            detections,
            output,
            full,
            max_span,
            max_boxes,
            line_width,
            labels,
            no_audio,
            library,
            hwaccel,
        } => {
            let args = cmd::ExportArgs {
                video,
                detections,
                output,
                full,
                max_span,
                max_boxes,
                line_width,
                labels,
                no_audio,
                library,
                hwaccel,
            };
            cmd::cmd_export(args, config).await?;
        }
        Commands::Preview {
            video,
            detections,
            at,
            output,
        } => {
            cmd::cmd_preview(&video, &detections, at, &output, &config).await?;
        }
    }

    Ok(())
}
