//! ffmpeg-backed frame renderer
//!
//! Two ffmpeg processes bracket the compositor:
//!
//! ```text
//! source ──► ffmpeg (decode, rotate) ──rgba──► FrameCompositor ──rgba──► ffmpeg (encode) ──► file
//! ```
//!
//! The decoder seeks to the chunk, applies the orientation filter and emits
//! raw RGBA frames at a constant rate, so frame `i` is presented at
//! `range.start + i / fps`. The encoder muxes those frames with the
//! source's audio for the same span.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::chunk::ExportRange;
use super::compositor::{ComposeOutcome, FrameCompositor, PixelBuffer};
use super::detection::DetectionStore;
use super::probe::AssetInfo;
use super::transform::Orientation;

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// MP4 with the index moved to the front
    #[default]
    Mp4,
    /// QuickTime
    Mov,
    /// Matroska
    Mkv,
}

impl Container {
    /// ffmpeg muxer name
    #[must_use]
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "matroska",
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
        }
    }
}

/// Encoder settings shared by every chunk of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    pub container: Container,
    pub video_codec: String,
    /// Video bitrate (e.g., "6M")
    pub video_bitrate: Option<String>,
    /// Audio codec (None = copy)
    pub audio_codec: Option<String>,
    /// Hardware decode (e.g., "videotoolbox", "cuda")
    pub hwaccel: Option<String>,
    /// Output frame rate (None = source rate)
    pub frame_rate: Option<f64>,
    /// Additional ffmpeg output arguments
    pub output_args: Vec<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: find_binary("ffmpeg"),
            ffprobe_path: find_binary("ffprobe"),
            container: Container::default(),
            video_codec: "libx264".to_string(),
            video_bitrate: Some("6M".to_string()),
            audio_codec: None,
            hwaccel: None,
            frame_rate: None,
            output_args: Vec::new(),
        }
    }
}

/// Absolute path from PATH, or the bare name for the OS to resolve.
fn find_binary(name: &str) -> String {
    which::which(name).map_or_else(|_| name.to_string(), |p| p.to_string_lossy().to_string())
}

impl EncoderConfig {
    /// Quick turnaround, larger files
    #[must_use]
    pub fn fast() -> Self {
        Self {
            output_args: vec!["-preset".to_string(), "veryfast".to_string()],
            ..Default::default()
        }
    }

    /// Create config for high-quality file output
    #[must_use]
    pub fn high_quality() -> Self {
        Self {
            video_bitrate: Some("12M".to_string()),
            output_args: vec![
                "-preset".to_string(),
                "slow".to_string(),
                "-crf".to_string(),
                "18".to_string(),
            ],
            ..Default::default()
        }
    }

    /// Enable hardware acceleration
    #[must_use]
    pub fn with_hwaccel(mut self, accel: &str) -> Self {
        self.hwaccel = Some(accel.to_string());

        // Set appropriate video codec for the accelerator
        self.video_codec = match accel {
            "videotoolbox" => "h264_videotoolbox",
            "cuda" | "nvenc" => "h264_nvenc",
            "vaapi" => "h264_vaapi",
            "qsv" => "h264_qsv",
            _ => "libx264",
        }
        .to_string();

        self
    }

    /// Render geometry for `asset`, honouring a configured frame rate.
    #[must_use]
    pub fn geometry_for(&self, asset: &AssetInfo) -> RenderGeometry {
        let mut geometry = RenderGeometry::for_asset(asset);
        if let Some(fps) = self.frame_rate.filter(|f| f.is_finite() && *f > 0.0) {
            geometry.fps = fps;
        }
        geometry
    }

    /// Decoder arguments: seek, rotate upright, emit raw RGBA on stdout.
    #[must_use]
    pub fn decode_args(&self, job: &RenderJob) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostdin"]
            .iter()
            .map(std::string::ToString::to_string)
            .collect();

        if let Some(ref accel) = self.hwaccel {
            args.push("-hwaccel".to_string());
            args.push(accel.clone());
        }

        // Rotation is applied explicitly below, exactly once.
        args.push("-noautorotate".to_string());
        args.push("-ss".to_string());
        args.push(format!("{:.3}", job.range.start));
        args.push("-t".to_string());
        args.push(format!("{:.3}", job.range.duration()));
        args.push("-i".to_string());
        args.push(job.input.to_string_lossy().to_string());

        if let Some(filter) = job.geometry.orientation.ffmpeg_filter() {
            args.push("-vf".to_string());
            args.push(filter.to_string());
        }

        args.extend(
            [
                "-an".to_string(),
                "-r".to_string(),
                fps_arg(job.geometry.fps),
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgba".to_string(),
                "pipe:1".to_string(),
            ],
        );
        args
    }

    /// Arguments for grabbing the single upright frame shown at `at` as raw RGBA.
    #[must_use]
    pub fn still_args(&self, input: &Path, orientation: Orientation, at: f64) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-noautorotate",
        ]
        .iter()
        .map(std::string::ToString::to_string)
        .collect();

        args.push("-ss".to_string());
        args.push(format!("{at:.3}"));
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        if let Some(filter) = orientation.ffmpeg_filter() {
            args.push("-vf".to_string());
            args.push(filter.to_string());
        }

        args.extend(
            ["-frames:v", "1", "-an", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]
                .iter()
                .map(std::string::ToString::to_string),
        );
        args
    }

    /// Encoder arguments: raw RGBA on stdin, source audio for the same span.
    #[must_use]
    pub fn encode_args(&self, job: &RenderJob) -> Vec<String> {
        let geometry = &job.geometry;
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning"]
            .iter()
            .map(std::string::ToString::to_string)
            .collect();

        args.extend([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", geometry.width, geometry.height),
            "-r".to_string(),
            fps_arg(geometry.fps),
            "-i".to_string(),
            "pipe:0".to_string(),
        ]);

        if job.audio {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", job.range.start));
            args.push("-t".to_string());
            args.push(format!("{:.3}", job.range.duration()));
            args.push("-i".to_string());
            args.push(job.input.to_string_lossy().to_string());
            args.extend(["-map", "0:v:0", "-map", "1:a:0?"].iter().map(std::string::ToString::to_string));
        }

        if let Some(ref overlay) = job.overlay_filter {
            args.push("-vf".to_string());
            args.push(overlay.clone());
        }

        args.push("-c:v".to_string());
        args.push(self.video_codec.clone());

        if let Some(ref bitrate) = self.video_bitrate {
            args.push("-b:v".to_string());
            args.push(bitrate.clone());
        }

        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());

        if job.audio {
            args.push("-c:a".to_string());
            args.push(self.audio_codec.clone().unwrap_or_else(|| "copy".to_string()));
            args.push("-shortest".to_string());
        }

        // Custom output args
        args.extend(self.output_args.clone());

        args.push("-f".to_string());
        args.push(self.container.ffmpeg_format().to_string());
        if matches!(self.container, Container::Mp4 | Container::Mov) {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push("-y".to_string());
        args.push(job.output.to_string_lossy().to_string());
        args
    }
}

fn fps_arg(fps: f64) -> String {
    format!("{fps:.6}")
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Size, rate and rotation of the frames the compositor sees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderGeometry {
    pub orientation: Orientation,
    /// Render (post-rotation) width
    pub width: u32,
    /// Render (post-rotation) height
    pub height: u32,
    pub fps: f64,
}

impl RenderGeometry {
    #[must_use]
    pub fn for_asset(asset: &AssetInfo) -> Self {
        let (width, height) = asset.render_size();
        Self {
            orientation: asset.orientation(),
            width,
            height,
            fps: asset.fps,
        }
    }
}

/// Everything needed to render one chunk.
#[derive(Clone)]
pub struct RenderJob {
    pub input: PathBuf,
    pub range: ExportRange,
    pub output: PathBuf,
    pub geometry: RenderGeometry,
    pub compositor: Arc<dyn FrameCompositor>,
    pub store: DetectionStore,
    /// Extra encoder-side filter chain (label text)
    pub overlay_filter: Option<String>,
    /// Carry the source audio track
    pub audio: bool,
}

impl RenderJob {
    /// Frames the decoder is expected to emit for the range.
    #[must_use]
    pub fn expected_frames(&self) -> u64 {
        (self.range.duration() * self.geometry.fps).ceil().max(0.0) as u64
    }

    /// Presentation time of output frame `index`.
    #[must_use]
    pub fn frame_time(&self, index: u64) -> f64 {
        self.range.start + index as f64 / self.geometry.fps
    }
}

impl std::fmt::Debug for RenderJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderJob")
            .field("input", &self.input)
            .field("range", &self.range)
            .field("output", &self.output)
            .field("geometry", &self.geometry)
            .field("audio", &self.audio)
            .finish_non_exhaustive()
    }
}

/// Frame counter shared between the renderer and whoever reports progress.
#[derive(Debug, Default)]
pub struct RenderProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl RenderProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    pub fn advance(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn frames_done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Completed fraction in `[0, 1]`; 0 until a total is known.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.frames_done() as f64 / total as f64).clamp(0.0, 1.0) as f32
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {detail}")]
    Exited {
        tool: &'static str,
        status: ExitStatus,
        detail: String,
    },

    #[error("{0} pipe unavailable")]
    Pipe(&'static str),

    #[error("frame pipe error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder produced no frames")]
    NoFrames,
}

/// Something that turns a [`RenderJob`] into an encoded file.
#[async_trait]
pub trait VideoRenderer: Send + Sync {
    /// Render the job, advancing `progress` once per written frame.
    ///
    /// Dropping the future must stop all work.
    async fn render(&self, job: RenderJob, progress: Arc<RenderProgress>) -> Result<(), RenderError>;
}

const DECODER: &str = "decoder";
const ENCODER: &str = "encoder";

/// Renderer driving two ffmpeg child processes.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRenderer {
    config: EncoderConfig,
}

impl FfmpegRenderer {
    #[must_use]
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Check if ffmpeg is available
    pub async fn check_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Decode the upright frame shown at `at`, for previews.
    pub async fn extract_frame(
        &self,
        input: &Path,
        geometry: &RenderGeometry,
        at: f64,
    ) -> Result<PixelBuffer, RenderError> {
        let args = self.config.still_args(input, geometry.orientation, at);
        debug!("still args: {:?}", args);

        let output = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RenderError::Spawn { tool: DECODER, source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Exited {
                tool: DECODER,
                status: output.status,
                detail: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }

        let expected = PixelBuffer::frame_len(geometry.width, geometry.height);
        let mut bytes = output.stdout;
        if bytes.len() < expected {
            return Err(RenderError::NoFrames);
        }
        bytes.truncate(expected);
        Ok(PixelBuffer::from_rgba(geometry.width, geometry.height, bytes))
    }

    fn spawn(&self, tool: &'static str, args: &[String], stdin: Stdio, stdout: Stdio) -> Result<Child, RenderError> {
        debug!("{} args: {:?}", tool, args);
        Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RenderError::Spawn { tool, source })
    }
}

#[async_trait]
impl VideoRenderer for FfmpegRenderer {
    async fn render(&self, job: RenderJob, progress: Arc<RenderProgress>) -> Result<(), RenderError> {
        let geometry = job.geometry;
        let frame_len = PixelBuffer::frame_len(geometry.width, geometry.height);
        progress.reset(job.expected_frames());

        let mut decoder = self.spawn(DECODER, &self.config.decode_args(&job), Stdio::null(), Stdio::piped())?;
        let mut encoder = self.spawn(ENCODER, &self.config.encode_args(&job), Stdio::piped(), Stdio::null())?;
        let decoder_log = drain_stderr(DECODER, decoder.stderr.take());
        let encoder_log = drain_stderr(ENCODER, encoder.stderr.take());

        let mut frames = decoder.stdout.take().ok_or(RenderError::Pipe("decoder stdout"))?;
        let mut sink = encoder.stdin.take().ok_or(RenderError::Pipe("encoder stdin"))?;

        let mut bytes = vec![0u8; frame_len];
        let mut written = 0u64;
        let mut annotated = 0u64;
        let mut encoder_gone = false;

        loop {
            let filled = read_frame(&mut frames, &mut bytes).await?;
            if filled < frame_len {
                if filled > 0 {
                    warn!(bytes = filled, expected = frame_len, "dropping truncated trailing frame");
                }
                break;
            }

            let mut frame = PixelBuffer::from_rgba(geometry.width, geometry.height, bytes);
            if let ComposeOutcome::Drawn(_) = job.compositor.compose(&mut frame, job.frame_time(written), &job.store) {
                annotated += 1;
            }
            bytes = frame.into_bytes();

            if let Err(e) = sink.write_all(&bytes).await {
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    encoder_gone = true;
                    break;
                }
                return Err(e.into());
            }
            written += 1;
            progress.advance();
        }

        // Closing stdin lets the encoder finish the file.
        if !encoder_gone {
            sink.flush().await?;
        }
        drop(sink);
        drop(frames);
        if encoder_gone {
            let _ = decoder.start_kill();
        }

        let decoder_status = decoder.wait().await?;
        let encoder_status = encoder.wait().await?;
        let decoder_detail = decoder_log.await.unwrap_or_default();
        let encoder_detail = encoder_log.await.unwrap_or_default();

        if !decoder_status.success() && !encoder_gone {
            return Err(RenderError::Exited {
                tool: DECODER,
                status: decoder_status,
                detail: decoder_detail,
            });
        }
        if !encoder_status.success() || encoder_gone {
            return Err(RenderError::Exited {
                tool: ENCODER,
                status: encoder_status,
                detail: encoder_detail,
            });
        }
        if written == 0 {
            return Err(RenderError::NoFrames);
        }

        info!(
            "Rendered {} frames ({} annotated) of {} to {:?}",
            written, annotated, job.range, job.output
        );
        Ok(())
    }
}

/// Fill `buf` from `reader`; fewer bytes than `buf.len()` means end of stream.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Log ffmpeg's stderr; resolves to the last non-empty line for error reports.
fn drain_stderr(tool: &'static str, stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let Some(stderr) = stderr else {
            return String::new();
        };
        let mut lines = BufReader::new(stderr).lines();
        let mut last = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains("Error") || line.contains("error") || line.contains("Warning") {
                warn!("{}: {}", tool, line);
            } else {
                debug!("{}: {}", tool, line);
            }
            if !line.trim().is_empty() {
                last = line;
            }
        }
        last
    })
}
