//! Export sessions
//!
//! An [`ExportPipeline`] owns one asset, its detection store and the
//! collaborators that turn a time range into a saved file. At most one
//! session runs at a time; its state is published on a `watch` channel so
//! progress indicators are plain subscribers.
//!
//! A session runs as a spawned task:
//!
//! 1. the renderer encodes the range, calling the compositor once per frame;
//! 2. a poller samples frame progress on a fixed interval;
//! 3. on success the file goes to the [`Persister`].
//!
//! Cancellation is honoured through both the render and the persist step.
//!
//! When the session ends the poller is stopped first, transient files are
//! removed next, and only then is the terminal state published.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunk::{ChunkSelector, ExportRange, InvalidSpan, DEFAULT_MAX_SPAN_SECS};
use super::compositor::FrameCompositor;
use super::detection::DetectionStore;
use super::labels::LabelOverlay;
use super::probe::AssetInfo;
use super::renderer::{RenderGeometry, RenderJob, RenderProgress, VideoRenderer};
use super::state::{ExportError, ExportState};
use super::transform::CoordinateTransformer;

/// Tolerance when comparing a range end to the probed duration.
const DURATION_EPSILON: f64 = 1e-6;

/// Where a finished encode ends up.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Take ownership of `encoded` and return its final location.
    async fn persist(&self, encoded: &Path) -> Result<PathBuf>;
}

/// Leaves the file where the encoder wrote it.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepInPlace;

#[async_trait]
impl Persister for KeepInPlace {
    async fn persist(&self, encoded: &Path) -> Result<PathBuf> {
        tokio::fs::metadata(encoded)
            .await
            .with_context(|| format!("encoded file missing: {}", encoded.display()))?;
        Ok(encoded.to_path_buf())
    }
}

/// Moves finished exports into a library directory under a timestamped name.
#[derive(Debug, Clone)]
pub struct LibraryPersister {
    dir: PathBuf,
}

impl LibraryPersister {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `boxreel-20240131-154502.mp4`, with `-2`, `-3`… on collision.
    fn destination(&self, encoded: &Path) -> PathBuf {
        let ext = encoded.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let mut candidate = self.dir.join(format!("boxreel-{stamp}.{ext}"));
        let mut n = 2;
        while candidate.exists() {
            candidate = self.dir.join(format!("boxreel-{stamp}-{n}.{ext}"));
            n += 1;
        }
        candidate
    }
}

#[async_trait]
impl Persister for LibraryPersister {
    async fn persist(&self, encoded: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create library {}", self.dir.display()))?;

        let destination = self.destination(encoded);
        if tokio::fs::rename(encoded, &destination).await.is_err() {
            // Different filesystem: copy, then drop the original.
            tokio::fs::copy(encoded, &destination)
                .await
                .with_context(|| format!("failed to copy into {}", destination.display()))?;
            tokio::fs::remove_file(encoded)
                .await
                .with_context(|| format!("failed to remove {}", encoded.display()))?;
        }

        info!("Saved export to {}", destination.display());
        Ok(destination)
    }
}

/// `[export]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Upper bound on one detection-driven chunk, seconds
    pub max_chunk_secs: f64,
    /// How often progress is sampled
    pub progress_interval_ms: u64,
    /// Carry the source audio when it has any
    pub audio: bool,
    /// Move finished exports here (None = keep at the output path)
    pub library_dir: Option<PathBuf>,
    /// Where `start` writes when no output path is given (None = system temp dir)
    pub output_dir: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_chunk_secs: DEFAULT_MAX_SPAN_SECS,
            progress_interval_ms: 1000,
            audio: true,
            library_dir: None,
            output_dir: None,
        }
    }
}

impl ExportConfig {
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }

    #[must_use]
    pub fn with_library_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.library_dir = dir;
        self
    }

    /// Persister matching `library_dir`.
    #[must_use]
    pub fn persister(&self) -> Arc<dyn Persister> {
        match self.library_dir {
            Some(ref dir) => Arc::new(LibraryPersister::new(dir.clone())),
            None => Arc::new(KeepInPlace),
        }
    }
}

/// Caller's view of one running session.
#[derive(Debug)]
pub struct ExportHandle {
    state: watch::Receiver<ExportState>,
    cancel: CancellationToken,
}

impl ExportHandle {
    /// Last published progress; 1.0 once completed, 0.0 if failed.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.state.borrow().progress().unwrap_or(0.0)
    }

    #[must_use]
    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.clone()
    }

    /// Request cancellation; the session ends in `Failed(Cancelled)`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolve once the session reaches `Completed` or `Failed`.
    pub async fn wait(mut self) -> ExportState {
        if let Ok(state) = self.state.wait_for(ExportState::is_terminal).await {
            return state.clone();
        }
        // Sender gone: report whatever was last published.
        self.state.borrow().clone()
    }
}

/// Single-session export orchestrator for one asset.
pub struct ExportPipeline {
    asset: AssetInfo,
    geometry: RenderGeometry,
    store: DetectionStore,
    renderer: Arc<dyn VideoRenderer>,
    compositor: Arc<dyn FrameCompositor>,
    persister: Arc<dyn Persister>,
    labels: Option<LabelOverlay>,
    config: ExportConfig,
    output_extension: String,
    state: Arc<watch::Sender<ExportState>>,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl ExportPipeline {
    /// Pipeline with default config, keeping outputs in place.
    pub fn new(
        asset: AssetInfo,
        store: DetectionStore,
        renderer: Arc<dyn VideoRenderer>,
        compositor: Arc<dyn FrameCompositor>,
    ) -> Self {
        let (state, _) = watch::channel(ExportState::Idle);
        Self {
            geometry: RenderGeometry::for_asset(&asset),
            asset,
            store,
            renderer,
            compositor,
            persister: Arc::new(KeepInPlace),
            labels: None,
            config: ExportConfig::default(),
            output_extension: "mp4".to_string(),
            state: Arc::new(state),
            active: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: RenderGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = persister;
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Option<LabelOverlay>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ExportConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_output_extension(mut self, extension: &str) -> Self {
        self.output_extension = extension.trim_start_matches('.').to_string();
        self
    }

    #[must_use]
    pub fn asset(&self) -> &AssetInfo {
        &self.asset
    }

    #[must_use]
    pub fn geometry(&self) -> &RenderGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn store(&self) -> &DetectionStore {
        &self.store
    }

    /// Detection-driven chunks for this asset.
    ///
    /// Fails when the configured `max_chunk_secs` is not a positive span.
    pub fn chunks(&self) -> Result<Vec<ExportRange>, InvalidSpan> {
        let selector = ChunkSelector::new(self.config.max_chunk_secs, self.asset.duration)?;
        Ok(selector.select_from_store(&self.store))
    }

    #[must_use]
    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    /// Cancel the running session, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Export `range` to a fresh file in the configured output directory.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, range: ExportRange) -> Result<ExportHandle, ExportError> {
        let dir = self.config.output_dir.clone().unwrap_or_else(std::env::temp_dir);
        let output = dir.join(format!("boxreel-{}.{}", uuid::Uuid::new_v4(), self.output_extension));
        self.start_to(range, output)
    }

    /// Export `range` to `output`.
    ///
    /// Fails with `InvalidRange` before any work starts, or `Busy` if a
    /// session is already exporting. Must be called from within a Tokio runtime.
    pub fn start_to(&self, range: ExportRange, output: impl Into<PathBuf>) -> Result<ExportHandle, ExportError> {
        self.validate(&range)?;

        // `Exporting` is never visible without its token in `active`.
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            let claimed = self.state.send_if_modified(|state| {
                if state.is_active() {
                    false
                } else {
                    *state = ExportState::Exporting { progress: 0.0 };
                    true
                }
            });
            if !claimed {
                warn!("Rejected export of {}: another export is running", range);
                return Err(ExportError::Busy);
            }
            *active = Some(cancel.clone());
        }

        let output = output.into();
        info!("Export started: {} -> {}", range, output.display());

        let session = Session {
            job: self.job(range, output),
            renderer: Arc::clone(&self.renderer),
            persister: Arc::clone(&self.persister),
            interval: self.config.progress_interval(),
            state: Arc::clone(&self.state),
            active: Arc::clone(&self.active),
        };
        tokio::spawn(session.run(cancel.clone()));

        Ok(ExportHandle {
            state: self.state.subscribe(),
            cancel,
        })
    }

    fn validate(&self, range: &ExportRange) -> Result<(), ExportError> {
        let duration = self.asset.duration;
        let valid = range.start.is_finite()
            && range.end.is_finite()
            && range.start >= 0.0
            && range.end > range.start
            && range.end <= duration + DURATION_EPSILON;
        if valid {
            Ok(())
        } else {
            Err(ExportError::InvalidRange {
                start: range.start,
                end: range.end,
                duration,
            })
        }
    }

    fn job(&self, range: ExportRange, output: PathBuf) -> RenderJob {
        let overlay_filter = self.labels.as_ref().and_then(|labels| {
            let transformer =
                CoordinateTransformer::new(self.geometry.width, self.geometry.height, self.geometry.orientation);
            labels.filter_chain(&self.store, &range, &transformer)
        });

        RenderJob {
            input: self.asset.path.clone(),
            range,
            output,
            geometry: self.geometry,
            compositor: Arc::clone(&self.compositor),
            store: self.store.clone(),
            overlay_filter,
            audio: self.config.audio && self.asset.has_audio,
        }
    }
}

/// Everything a running session owns.
struct Session {
    job: RenderJob,
    renderer: Arc<dyn VideoRenderer>,
    persister: Arc<dyn Persister>,
    interval: Duration,
    state: Arc<watch::Sender<ExportState>>,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Session {
    async fn run(self, cancel: CancellationToken) {
        let output = self.job.output.clone();
        let progress = Arc::new(RenderProgress::new());
        let poller = tokio::spawn(poll_progress(
            Arc::clone(&self.state),
            Arc::clone(&progress),
            self.interval,
        ));

        let rendered = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExportError::Cancelled),
            result = self.renderer.render(self.job, Arc::clone(&progress)) => {
                result.map_err(|e| ExportError::EncodeFailure(e.to_string()))
            }
        };

        poller.abort();
        let _ = poller.await;

        let saved = match rendered {
            Ok(()) => tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ExportError::Cancelled),
                result = self.persister.persist(&output) => result.map_err(|e| {
                    warn!("Export encoded but could not be saved: {:#}", e);
                    ExportError::PersistFailed(format!("{e:#}"))
                }),
            },
            Err(reason) => Err(reason),
        };

        let terminal = match saved {
            Ok(saved) => {
                info!("Export completed: {}", saved.display());
                ExportState::Completed { output: saved }
            }
            Err(reason) => {
                remove_transient(&output).await;
                warn!("Export failed: {}", reason);
                ExportState::Failed { reason }
            }
        };

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.send_replace(terminal);
    }
}

/// Publish frame progress while the session is exporting. Never moves backwards.
async fn poll_progress(state: Arc<watch::Sender<ExportState>>, progress: Arc<RenderProgress>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let sample = progress.fraction().clamp(0.0, 1.0);
        state.send_if_modified(|current| match current {
            ExportState::Exporting { progress } if sample > *progress => {
                *progress = sample;
                true
            }
            _ => false,
        });
    }
}

async fn remove_transient(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}
