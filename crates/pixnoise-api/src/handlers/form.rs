//! Multipart upload parsing shared by the image and video endpoints.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::{HeaderValue, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use pixnoise_media::fs_utils::remove_file_if_exists;
use pixnoise_models::{parse_form_bool, parse_form_f64, PerturbParams, DEFAULT_PERTURB_PROB};

use crate::error::{ApiError, ApiResult};

/// Where the uploaded `file` field goes.
#[derive(Debug, Clone)]
pub enum UploadTarget {
    /// Keep the bytes in memory.
    Memory,
    /// Stream to `dir/<stem><ext>`, with the extension taken from the upload name.
    File { dir: PathBuf, stem: String },
}

#[derive(Debug)]
pub enum UploadData {
    Bytes(Bytes),
    File(PathBuf),
}

/// Parsed upload form.
#[derive(Debug)]
pub struct UploadForm {
    pub filename: Option<String>,
    pub data: UploadData,
    pub params: PerturbParams,
}

/// Read `file`, `perturb_prob` and `visual_debug` from a multipart body.
/// Unknown fields are skipped. On error nothing is left on disk.
pub async fn read_upload(multipart: Multipart, target: &UploadTarget) -> ApiResult<UploadForm> {
    let mut saved: Option<PathBuf> = None;
    let result = read_fields(multipart, target, &mut saved).await;
    if result.is_err() {
        if let Some(path) = saved {
            if let Err(e) = remove_file_if_exists(&path).await {
                warn!("Failed to remove partial upload {}: {}", path.display(), e);
            }
        }
    }
    result
}

async fn read_fields(
    mut multipart: Multipart,
    target: &UploadTarget,
    saved: &mut Option<PathBuf>,
) -> ApiResult<UploadForm> {
    let mut filename = None;
    let mut data = None;
    let mut perturb_prob = DEFAULT_PERTURB_PROB;
    let mut visual_debug = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Invalid multipart body", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().map(str::to_string);
                data = Some(match target {
                    UploadTarget::Memory => UploadData::Bytes(
                        field
                            .bytes()
                            .await
                            .map_err(|e| multipart_error("Failed to read upload", e))?,
                    ),
                    UploadTarget::File { dir, stem } => {
                        let path = dir.join(format!(
                            "{}{}",
                            stem,
                            extension_of(filename.as_deref().unwrap_or_default())
                        ));
                        *saved = Some(path.clone());
                        stream_to_file(field, &path).await?;
                        UploadData::File(path)
                    }
                });
            }
            "perturb_prob" => perturb_prob = parse_form_f64(&field_text(field).await?)?,
            "visual_debug" => visual_debug = parse_form_bool(&field_text(field).await?)?,
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::bad_request("Missing required field: file"))?;
    let params = PerturbParams::new(perturb_prob, visual_debug)?;

    Ok(UploadForm {
        filename,
        data,
        params,
    })
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| multipart_error("Invalid form field", e))
}

/// Bodies cut off by the size limit are 413, anything else malformed is 400.
fn multipart_error(context: &str, e: MultipartError) -> ApiError {
    let message = format!("{}: {}", context, e.body_text());
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::bad_request(message)
    }
}

async fn stream_to_file(mut field: Field<'_>, path: &Path) -> ApiResult<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error("Failed to read upload", e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;
    Ok(())
}

/// Extension including the dot, or empty.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// `Content-Disposition` for a download. Characters that cannot appear in a
/// header are replaced with `_`.
pub fn attachment(filename: &str, quoted: bool) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = if quoted {
        format!("attachment; filename=\"{}\"", safe)
    } else {
        format!("attachment; filename={}", safe)
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
