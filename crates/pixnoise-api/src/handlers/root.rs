//! Service description.

use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: String,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

/// Describe the available endpoints. `/metrics` is listed only when mounted.
pub async fn root(metrics_mounted: bool) -> Json<RootResponse> {
    let mut endpoints = BTreeMap::from([
        ("/process_image", "POST - Perturb an image"),
        ("/process_video", "POST - Perturb a video, returns a task id"),
        ("/video_progress/{task_id}", "GET - SSE progress stream"),
        ("/video_result/{task_id}", "GET - Download the processed video"),
        ("/health", "GET - Health check"),
        ("/ready", "GET - Readiness check"),
    ]);
    if metrics_mounted {
        endpoints.insert("/metrics", "GET - Prometheus metrics");
    }

    Json(RootResponse {
        message: "Image/video pixel perturbation API".to_string(),
        endpoints,
    })
}
