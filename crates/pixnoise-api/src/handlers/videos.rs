//! Video submission, progress stream and result download.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use pixnoise_media::fs_utils::remove_file_if_exists;
use pixnoise_models::{TaskId, TaskProgress, TaskStatus};

use crate::error::{ApiError, ApiResult};
use crate::handlers::form::{attachment, read_upload, UploadData, UploadTarget};
use crate::services::{spawn_video_task, VideoTask};
use crate::state::AppState;
use crate::tasks::TaskRegistry;

/// Interval between progress events.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Store an uploaded video and start processing it in the background.
pub async fn process_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    let _permit = state
        .video_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::ServiceUnavailable("Server is shutting down".to_string()))?;

    let task_id = TaskId::new();
    let file_id = Uuid::new_v4();
    let temp_dir = state.config.temp_dir.clone();
    let output = temp_dir.join(format!("output_{}.mp4", file_id));

    state
        .tasks
        .insert(
            task_id.clone(),
            TaskProgress::new(output.display().to_string(), None),
        )
        .await;

    let target = UploadTarget::File {
        dir: temp_dir,
        stem: format!("input_{}", file_id),
    };
    let form = match read_upload(multipart, &target).await {
        Ok(form) => form,
        Err(e) => {
            if let Err(cleanup) = remove_file_if_exists(&output).await {
                warn!("Failed to remove {}: {}", output.display(), cleanup);
            }
            state.tasks.update(&task_id, |t| t.fail(e.to_string())).await;
            return Err(match e {
                ApiError::Internal(msg) => {
                    ApiError::internal(format!("Failed to process video: {}", msg))
                }
                other => other,
            });
        }
    };

    let input = match form.data {
        UploadData::File(path) => path,
        UploadData::Bytes(_) => return Err(ApiError::internal("Unexpected upload target")),
    };

    let filename = form.filename.filter(|name| !name.is_empty());
    state
        .tasks
        .update(&task_id, |t| {
            t.filename = filename;
            t.start("Starting...");
        })
        .await;

    info!(
        task_id = %task_id,
        input = %input.display(),
        perturb_prob = form.params.perturb_prob,
        visual_debug = form.params.visual_debug,
        "Video accepted"
    );

    spawn_video_task(
        state.clone(),
        VideoTask {
            task_id: task_id.clone(),
            input,
            output,
            params: form.params,
        },
    );

    Ok(Json(SubmitResponse {
        task_id: task_id.to_string(),
    }))
}

/// Server-sent progress events for a task, until it finishes.
pub async fn video_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let stream = progress_stream(Arc::clone(&state.tasks), TaskId::from_string(task_id));
    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(stream),
    )
}

/// One event per poll; ends after a terminal status or an unknown task.
pub fn progress_stream(
    tasks: Arc<TaskRegistry>,
    task_id: TaskId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (tasks, task_id, true, false),
        |(tasks, task_id, first, finished)| async move {
            if finished {
                return None;
            }
            if !first {
                tokio::time::sleep(PROGRESS_INTERVAL).await;
            }

            let (payload, done) = match tasks.get(&task_id).await {
                Some(task) => {
                    let done = task.is_terminal();
                    let payload = serde_json::to_string(&task).unwrap_or_else(|e| {
                        serde_json::json!({ "error": e.to_string() }).to_string()
                    });
                    (payload, done)
                }
                None => (
                    serde_json::json!({ "error": "Task not found" }).to_string(),
                    true,
                ),
            };

            Some((
                Ok(Event::default().data(payload)),
                (tasks, task_id, false, done),
            ))
        },
    )
}

/// Download the processed video of a completed task.
pub async fn video_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    let task = state
        .tasks
        .get(&TaskId::from_string(task_id))
        .await
        .ok_or_else(|| ApiError::not_found("Task not found"))?;

    if task.status != TaskStatus::Completed {
        return Err(ApiError::bad_request("Video processing not finished"));
    }

    let file = match tokio::fs::File::open(&task.output_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Output file not found"));
        }
        Err(e) => return Err(ApiError::internal(format!("Failed to open output: {}", e))),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read output: {}", e)))?
        .len();

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
            (header::CONTENT_DISPOSITION, attachment(&task.download_name(), true)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
