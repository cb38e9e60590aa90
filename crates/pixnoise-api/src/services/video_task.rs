//! Background execution of accepted video uploads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use pixnoise_media::fs_utils::remove_file_if_exists;
use pixnoise_media::{MediaError, StepCallback};
use pixnoise_models::{PerturbParams, TaskId};

use crate::logging::TaskLogger;
use crate::metrics;
use crate::state::AppState;
use crate::tasks::TaskRegistry;

/// Error recorded for tasks stopped by server shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// A stored upload waiting to be processed.
#[derive(Debug, Clone)]
pub struct VideoTask {
    pub task_id: TaskId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub params: PerturbParams,
}

type StepUpdate = Option<(u64, u64, String)>;

/// Run `task` in the background once a video worker is free.
pub fn spawn_video_task(state: AppState, task: VideoTask) -> JoinHandle<()> {
    let logger = TaskLogger::new(&task.task_id, "process_video");
    let span = logger.create_span();
    let tracker = state.video_tasks.clone();
    tracker.spawn(run_video_task(state, task, logger).instrument(span))
}

/// Callback that records pipeline steps on `task_id`, plus the task applying
/// them. The task ends once every clone of the callback is dropped.
///
/// Pipeline callbacks are synchronous and may run on rayon threads, so only
/// the latest step is kept in a watch channel and applied asynchronously.
pub fn forward_progress(tasks: Arc<TaskRegistry>, task_id: TaskId) -> (StepCallback, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel::<StepUpdate>(None);
    let forwarder = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let step = rx.borrow_and_update().clone();
            if let Some((current, total, info)) = step {
                tasks.update(&task_id, |t| t.update(current, total, info)).await;
            }
        }
    });
    let callback: StepCallback = Arc::new(move |current: u64, total: u64, info: &str| {
        tx.send_replace(Some((current, total, info.to_string())));
    });
    (callback, forwarder)
}

async fn run_video_task(state: AppState, task: VideoTask, logger: TaskLogger) {
    let permit = match Arc::clone(&state.video_workers).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            logger.log_warning("Server is shutting down, task dropped");
            state
                .tasks
                .update(&task.task_id, |t| t.fail(SHUTDOWN_MESSAGE))
                .await;
            cleanup_input(&task, &logger).await;
            return;
        }
    };

    logger.log_start(&task.input.display().to_string());
    metrics::record_video_started();
    let started = Instant::now();

    let (callback, forwarder) = forward_progress(Arc::clone(&state.tasks), task.task_id.clone());

    let result = match state.video_pipeline() {
        Ok(pipeline) => {
            pipeline
                .process(&task.input, &task.output, task.params, Some(callback))
                .await
        }
        Err(e) => {
            drop(callback);
            Err(e)
        }
    };
    let _ = forwarder.await;
    cleanup_input(&task, &logger).await;

    let success = result.is_ok();
    match result {
        Ok(metadata) => {
            logger.log_completion(&format!(
                "{} frames at {:.2} fps, audio: {}",
                metadata.total_frames, metadata.fps, metadata.has_audio
            ));
            state
                .tasks
                .update(&task.task_id, |t| t.complete(metadata))
                .await;
        }
        Err(e) => {
            let message = match e {
                MediaError::Cancelled => SHUTDOWN_MESSAGE.to_string(),
                e => e.to_string(),
            };
            logger.log_error(&message);
            state.tasks.update(&task.task_id, |t| t.fail(message)).await;
            if let Err(e) = remove_file_if_exists(&task.output).await {
                logger.log_warning(&format!("Failed to remove partial output: {}", e));
            }
        }
    }

    metrics::record_video_finished(success, started.elapsed().as_secs_f64());
    drop(permit);
}

async fn cleanup_input(task: &VideoTask, logger: &TaskLogger) {
    if let Err(e) = remove_file_if_exists(&task.input).await {
        logger.log_warning(&format!("Failed to remove input {}: {}", task.input.display(), e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use pixnoise_media::FfmpegPaths;
    use pixnoise_models::{TaskProgress, TaskStatus};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn state_with(dir: &Path, workers: usize, ffmpeg: FfmpegPaths) -> AppState {
        let config = ApiConfig {
            temp_dir: dir.to_path_buf(),
            video_max_workers: workers,
            ..ApiConfig::default()
        };
        AppState::with_ffmpeg(config, Some(ffmpeg))
    }

    fn missing_tools() -> FfmpegPaths {
        FfmpegPaths::new("/nonexistent/pixnoise/ffmpeg", "/nonexistent/pixnoise/ffprobe")
    }

    /// ffprobe that describes a short silent clip, and ffmpeg that never finishes.
    #[cfg(unix)]
    fn hanging_tools(dir: &Path) -> FfmpegPaths {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let ffprobe = bin.join("ffprobe");
        std::fs::write(
            &ffprobe,
            "#!/bin/sh\necho '{\"streams\":[{\"codec_type\":\"video\",\"width\":16,\"height\":16,\"avg_frame_rate\":\"25/1\",\"nb_frames\":\"10\"}]}'\n",
        )
        .unwrap();
        let ffmpeg = bin.join("ffmpeg");
        std::fs::write(&ffmpeg, "#!/bin/sh\nexec sleep 30\n").unwrap();
        for tool in [&ffprobe, &ffmpeg] {
            std::fs::set_permissions(tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        FfmpegPaths::new(ffmpeg, ffprobe)
    }

    async fn submit(state: &AppState, dir: &Path, name: &str) -> (TaskId, VideoTask) {
        let input = dir.join(format!("input_{}.mp4", name));
        std::fs::write(&input, b"garbage").unwrap();
        let output = dir.join(format!("output_{}.mp4", name));
        let task_id = TaskId::new();
        state
            .tasks
            .insert(task_id.clone(), TaskProgress::new(output.display().to_string(), None))
            .await;
        let task = VideoTask {
            task_id: task_id.clone(),
            input,
            output,
            params: PerturbParams::default(),
        };
        (task_id, task)
    }

    #[tokio::test]
    async fn test_failed_task_is_marked_and_input_removed() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), 2, missing_tools());
        let (task_id, task) = submit(&state, dir.path(), "x").await;
        let input = task.input.clone();

        spawn_video_task(state.clone(), task).await.unwrap();

        let task = state.tasks.get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task
            .error
            .unwrap()
            .starts_with("Failed to split video into frames"));
        assert!(!input.exists());
        assert_eq!(state.video_workers.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_forward_progress_applies_latest_step() {
        let tasks = Arc::new(TaskRegistry::new());
        let task_id = TaskId::new();
        tasks
            .insert(task_id.clone(), TaskProgress::new("temp/output.mp4", None))
            .await;

        let (callback, forwarder) = forward_progress(Arc::clone(&tasks), task_id.clone());
        let worker = {
            let callback = Arc::clone(&callback);
            std::thread::spawn(move || {
                for frame in 1..=10 {
                    callback(frame, 10, "Perturbing frames");
                }
            })
        };
        worker.join().unwrap();
        drop(callback);

        tokio::time::timeout(Duration::from_secs(5), forwarder)
            .await
            .unwrap()
            .unwrap();

        let task = tasks.get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!((task.current, task.total), (10, 10));
        assert_eq!(task.info, "Perturbing frames");
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn test_drain_fails_queued_task() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), 1, missing_tools());
        let busy = Arc::clone(&state.video_workers).acquire_owned().await.unwrap();

        let (task_id, task) = submit(&state, dir.path(), "queued").await;
        let input = task.input.clone();
        let output = task.output.clone();
        spawn_video_task(state.clone(), task);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            state.tasks.get(&task_id).await.unwrap().status,
            TaskStatus::Pending
        );

        assert!(state.drain_video_jobs(Duration::from_secs(5)).await);
        drop(busy);

        let task = state.tasks.get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some(SHUTDOWN_MESSAGE));
        assert!(!input.exists());
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_timeout_cancels_running_task() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), 1, hanging_tools(dir.path()));
        let (task_id, task) = submit(&state, dir.path(), "running").await;
        let input = task.input.clone();
        spawn_video_task(state.clone(), task);

        let work_root = dir.path().join("catch_output_running");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !work_root.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        assert!(!state.drain_video_jobs(Duration::from_millis(300)).await);

        let task = state.tasks.get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some(SHUTDOWN_MESSAGE));
        assert!(!input.exists());
        assert!(!work_root.exists());
        assert!(state.video_tasks.is_empty());
    }
}
