//! Asset metadata via ffprobe
//!
//! Only what the export needs: duration, natural track size, frame rate,
//! display rotation and whether there is an audio stream to carry over.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::transform::Orientation;

/// Frame rate assumed when the stream does not report a usable one.
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffprobe failed on {path}: {stderr}")]
    Failed { path: PathBuf, stderr: String },

    #[error("invalid ffprobe output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no video stream found")]
    NoVideoStream,

    #[error("video stream has no dimensions")]
    MissingDimensions,
}

/// What the export pipeline knows about a source asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetInfo {
    pub path: PathBuf,
    /// Seconds
    pub duration: f64,
    /// Natural (encoded) width of the video track
    pub width: u32,
    /// Natural (encoded) height of the video track
    pub height: u32,
    pub fps: f64,
    /// Display rotation, clockwise degrees
    pub rotation: i32,
    pub has_audio: bool,
}

impl AssetInfo {
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        Orientation::from_rotation_degrees(self.rotation)
    }

    /// Size of the upright, displayed frame.
    #[must_use]
    pub fn render_size(&self) -> (u32, u32) {
        self.orientation().render_size(self.width, self.height)
    }
}

/// Run `ffprobe` on `path`.
pub async fn probe_asset(ffprobe_path: &str, path: &Path) -> Result<AssetInfo, ProbeError> {
    let output = Command::new(ffprobe_path)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            path: path.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let mut info = parse_probe_output(&output.stdout)?;
    info.path = path.to_path_buf();
    debug!(?info, "probed asset");
    Ok(info)
}

/// Parse `-print_format json -show_format -show_streams` output. `path` is left empty.
pub fn parse_probe_output(stdout: &[u8]) -> Result<AssetInfo, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(ProbeError::MissingDimensions);
    };

    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(FALLBACK_FPS);

    let duration = probe
        .format
        .duration
        .as_deref()
        .or(video.duration.as_deref())
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);

    Ok(AssetInfo {
        path: PathBuf::new(),
        duration,
        width,
        height,
        fps,
        rotation: video.rotation(),
        has_audio,
    })
}

/// `"30000/1001"` or `"25"`. Zero or non-finite rates are rejected.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => num.trim().parse::<f64>().ok()? / den.trim().parse::<f64>().ok()?,
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

impl FfprobeStream {
    /// Clockwise display rotation.
    ///
    /// Older muxers write a clockwise `rotate` tag; the display matrix side
    /// data reports counter-clockwise degrees.
    fn rotation(&self) -> i32 {
        if let Some(deg) = self.tags.rotate.as_deref().and_then(|r| r.trim().parse::<i32>().ok()) {
            return deg;
        }
        self.side_data_list
            .iter()
            .find_map(|sd| sd.rotation)
            .map_or(0, |deg| -(deg.round() as i32))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}
