//! Application state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use pixnoise_media::{FfmpegPaths, MediaResult, VideoPipeline};

use crate::config::ApiConfig;
use crate::tasks::TaskRegistry;

/// How long cancelled pipelines get to clean up after the shutdown timeout.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub tasks: Arc<TaskRegistry>,
    /// Concurrent image requests
    pub image_permits: Arc<Semaphore>,
    /// Concurrent video uploads being stored
    pub video_permits: Arc<Semaphore>,
    /// Concurrently running video pipelines
    pub video_workers: Arc<Semaphore>,
    /// Background video tasks, queued or running
    pub video_tasks: TaskTracker,
    shutdown_tx: Arc<watch::Sender<bool>>,
    ffmpeg: Option<FfmpegPaths>,
}

impl AppState {
    /// Create state, resolving FFmpeg once. A missing FFmpeg is not fatal:
    /// health stays green and lookup is retried per video.
    pub fn new(config: ApiConfig) -> Self {
        let ffmpeg = match FfmpegPaths::resolve() {
            Ok(paths) => {
                info!(
                    "Using ffmpeg at {}, ffprobe at {}",
                    paths.ffmpeg.display(),
                    paths.ffprobe.display()
                );
                Some(paths)
            }
            Err(e) => {
                warn!("FFmpeg not available at startup: {}", e);
                None
            }
        };
        Self::with_ffmpeg(config, ffmpeg)
    }

    /// Create state with explicit tool locations.
    pub fn with_ffmpeg(config: ApiConfig, ffmpeg: Option<FfmpegPaths>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            image_permits: Arc::new(Semaphore::new(config.image_max_workers)),
            video_permits: Arc::new(Semaphore::new(config.video_max_workers)),
            video_workers: Arc::new(Semaphore::new(config.video_max_workers)),
            video_tasks: TaskTracker::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            tasks: Arc::new(TaskRegistry::new()),
            config: Arc::new(config),
            ffmpeg,
        }
    }

    /// Create the temp directory. Must succeed before the first request.
    pub async fn prepare_temp_dir(&self) -> std::io::Result<&Path> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        Ok(self.config.temp_dir.as_path())
    }

    /// FFmpeg locations, resolving again if startup lookup failed.
    pub fn ffmpeg(&self) -> MediaResult<FfmpegPaths> {
        match &self.ffmpeg {
            Some(paths) => Ok(paths.clone()),
            None => FfmpegPaths::resolve(),
        }
    }

    /// Pipeline configured from this state, cancelled on forced shutdown.
    pub fn video_pipeline(&self) -> MediaResult<VideoPipeline> {
        Ok(VideoPipeline::new(self.ffmpeg()?)
            .with_frame_workers(self.config.frame_workers)
            .with_step_timeout(self.config.ffmpeg_step_timeout)
            .with_cancel(self.shutdown_tx.subscribe()))
    }

    /// Stop accepting video work and wait for running pipelines.
    ///
    /// Tasks still waiting for a worker fail right away. Running pipelines get
    /// `timeout` to finish; after that they are cancelled and given a short
    /// grace period to remove their files. Returns true when everything
    /// finished within `timeout`.
    pub async fn drain_video_jobs(&self, timeout: Duration) -> bool {
        self.video_workers.close();
        self.video_tasks.close();

        if tokio::time::timeout(timeout, self.video_tasks.wait()).await.is_ok() {
            return true;
        }

        warn!(
            running = self.video_tasks.len(),
            "Cancelling video tasks still running after {:?}", timeout
        );
        self.shutdown_tx.send_replace(true);
        if tokio::time::timeout(CANCEL_GRACE, self.video_tasks.wait())
            .await
            .is_err()
        {
            warn!("Video tasks did not stop after cancellation");
        }
        false
    }
}
