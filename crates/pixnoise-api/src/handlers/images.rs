//! Image perturbation endpoint.

use std::time::Instant;

use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use pixnoise_media::{process_image_bytes, MediaError};

use crate::error::{ApiError, ApiResult};
use crate::handlers::form::{attachment, read_upload, UploadData, UploadTarget};
use crate::metrics;
use crate::state::AppState;

/// Name used when the upload carries none.
const FALLBACK_IMAGE_NAME: &str = "image";

/// Perturb an uploaded image and return it as a download.
pub async fn process_image(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let _permit = state
        .image_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::ServiceUnavailable("Server is shutting down".to_string()))?;

    let form = read_upload(multipart, &UploadTarget::Memory).await?;
    let bytes = match form.data {
        UploadData::Bytes(bytes) => bytes,
        UploadData::File(_) => return Err(ApiError::internal("Unexpected upload target")),
    };
    let filename = form
        .filename
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_IMAGE_NAME.to_string());
    let params = form.params;

    debug!(
        filename = %filename,
        size = bytes.len(),
        perturb_prob = params.perturb_prob,
        visual_debug = params.visual_debug,
        "Processing image"
    );

    let started = Instant::now();
    let name = filename.clone();
    let result = tokio::task::spawn_blocking(move || process_image_bytes(&bytes, &name, &params))
        .await
        .map_err(|e| ApiError::internal(format!("Failed to process image: {}", e)))?;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok((data, format)) => {
            metrics::record_image_processed(format.mime_type(), true, elapsed);
            Ok((
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(format.mime_type())),
                    (
                        header::CONTENT_DISPOSITION,
                        attachment(&format!("processed_{}", filename), false),
                    ),
                ],
                data,
            )
                .into_response())
        }
        Err(MediaError::InvalidParams(e)) => Err(e.into()),
        Err(e) => {
            warn!(filename = %filename, "Image processing failed: {}", e);
            metrics::record_image_processed("unknown", false, elapsed);
            Err(ApiError::internal(format!("Failed to process image: {}", e)))
        }
    }
}
