//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "pixnoise_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "pixnoise_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "pixnoise_http_requests_in_flight";

    // Processing metrics
    pub const IMAGES_PROCESSED_TOTAL: &str = "pixnoise_images_processed_total";
    pub const IMAGE_PROCESSING_SECONDS: &str = "pixnoise_image_processing_seconds";
    pub const VIDEO_JOBS_STARTED_TOTAL: &str = "pixnoise_video_jobs_started_total";
    pub const VIDEO_JOBS_COMPLETED_TOTAL: &str = "pixnoise_video_jobs_completed_total";
    pub const VIDEO_JOBS_FAILED_TOTAL: &str = "pixnoise_video_jobs_failed_total";
    pub const VIDEO_JOB_DURATION_SECONDS: &str = "pixnoise_video_job_duration_seconds";
    pub const VIDEO_JOBS_ACTIVE: &str = "pixnoise_video_jobs_active";

    // Task registry
    pub const TASKS_SWEPT_TOTAL: &str = "pixnoise_tasks_swept_total";
    pub const TASKS_TRACKED: &str = "pixnoise_tasks_tracked";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a processed image.
pub fn record_image_processed(format: &str, success: bool, duration_secs: f64) {
    let labels = [
        ("format", format.to_string()),
        ("result", if success { "ok" } else { "error" }.to_string()),
    ];
    counter!(names::IMAGES_PROCESSED_TOTAL, &labels).increment(1);
    histogram!(names::IMAGE_PROCESSING_SECONDS).record(duration_secs);
}

pub fn record_video_started() {
    counter!(names::VIDEO_JOBS_STARTED_TOTAL).increment(1);
    gauge!(names::VIDEO_JOBS_ACTIVE).increment(1.0);
}

pub fn record_video_finished(success: bool, duration_secs: f64) {
    gauge!(names::VIDEO_JOBS_ACTIVE).decrement(1.0);
    if success {
        counter!(names::VIDEO_JOBS_COMPLETED_TOTAL).increment(1);
    } else {
        counter!(names::VIDEO_JOBS_FAILED_TOTAL).increment(1);
    }
    histogram!(names::VIDEO_JOB_DURATION_SECONDS).record(duration_secs);
}

pub fn record_tasks_swept(count: usize, remaining: usize) {
    counter!(names::TASKS_SWEPT_TOTAL).increment(count as u64);
    gauge!(names::TASKS_TRACKED).set(remaining as f64);
}

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("valid static pattern")
    })
}

fn task_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^/(video_progress|video_result)/[^/]+$")
            .expect("valid static pattern")
    })
}

/// Sanitize path for metrics labels (remove task ids).
fn sanitize_path(path: &str) -> String {
    let path = uuid_pattern().replace_all(path, ":id");
    task_pattern().replace_all(&path, "/$1/:task_id").to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/video_progress/550e8400-e29b-41d4-a716-446655440000"),
            "/video_progress/:task_id"
        );
        assert_eq!(sanitize_path("/video_result/anything"), "/video_result/:task_id");
        assert_eq!(sanitize_path("/process_image"), "/process_image");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
