//! Configuration loaded from `~/.config/boxreel/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::annotate::{CompositorConfig, EncoderConfig, ExportConfig};

/// `[feed]` settings for the detector feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Only this label is kept; empty keeps every label.
    pub label_filter: String,
    /// Seed for reproducible label colours.
    pub palette_seed: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            label_filter: crate::annotate::feed::DEFAULT_LABEL_FILTER.to_string(),
            palette_seed: None,
        }
    }
}

/// Top-level configuration file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub export: ExportConfig,
    pub compositor: CompositorConfig,
    pub encoder: EncoderConfig,
    pub feed: FeedConfig,
}

impl AppConfig {
    /// Load from the default location.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }
}

/// Return the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("boxreel")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Container;

    #[test]
    fn parse_empty_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.compositor.max_boxes, 3);
        assert!((config.compositor.line_width - 10.0).abs() < f64::EPSILON);
        assert!(!config.compositor.burn_labels);
        assert_eq!(config.export.progress_interval_ms, 1000);
        assert_eq!(config.feed.label_filter, "person");
        assert_eq!(config.encoder.video_codec, "libx264");
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[export]
max_chunk_secs = 6.5
audio = false
library_dir = "/tmp/library"

[compositor]
burn_labels = true

[encoder]
container = "mkv"
hwaccel = "vaapi"
frame_rate = 25.0

[feed]
label_filter = ""
palette_seed = 42
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!((config.export.max_chunk_secs - 6.5).abs() < f64::EPSILON);
        assert!(!config.export.audio);
        assert_eq!(config.export.library_dir, Some(PathBuf::from("/tmp/library")));
        assert_eq!(config.export.progress_interval_ms, 1000);
        assert!(config.compositor.burn_labels);
        assert_eq!(config.compositor.max_boxes, 3);
        assert_eq!(config.encoder.container, Container::Mkv);
        assert_eq!(config.encoder.hwaccel.as_deref(), Some("vaapi"));
        assert_eq!(config.encoder.frame_rate, Some(25.0));
        assert!(config.feed.label_filter.is_empty());
        assert_eq!(config.feed.palette_seed, Some(42));
    }

    #[test]
    fn load_from_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[compositor]\nmax_boxes = \"many\"\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));

        let missing = AppConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("failed to read"));
    }

    #[test]
    fn roundtrip_default_is_stable() {
        let text = toml::to_string(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.compositor.max_boxes, 3);
        assert_eq!(parsed.export, ExportConfig::default());
    }
}
