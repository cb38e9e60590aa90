//! API integration tests.

use std::io::Cursor;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use metrics_exporter_prometheus::PrometheusBuilder;
use pixnoise_api::{create_router, ApiConfig, AppState};
use pixnoise_media::FfmpegPaths;
use pixnoise_models::{TaskId, TaskProgress, TaskStatus, VideoMetadata};

const BOUNDARY: &str = "pixnoise-test-boundary";

struct TestApp {
    router: Router,
    state: AppState,
    dir: TempDir,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = ApiConfig {
        temp_dir: dir.path().to_path_buf(),
        ..ApiConfig::default()
    };
    let state = AppState::with_ffmpeg(
        config,
        Some(FfmpegPaths::new(
            "/nonexistent/pixnoise/ffmpeg",
            "/nonexistent/pixnoise/ffprobe",
        )),
    );
    TestApp {
        router: create_router(state.clone(), None),
        state,
        dir,
    }
}

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", name, value)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([100, 150, 200]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("ok"));
}

#[tokio::test]
async fn test_root_endpoint() {
    let app = test_app();
    let response = app.router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["endpoints"]["/process_image"].is_string());
    assert!(json["endpoints"]["/health"].is_string());
    assert!(json["endpoints"].get("/metrics").is_none());
}

#[tokio::test]
async fn test_root_lists_metrics_when_mounted() {
    let app = test_app();
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let router = create_router(app.state.clone(), Some(handle));

    let json = body_json(router.clone().oneshot(get("/")).await.unwrap()).await;
    assert!(json["endpoints"]["/metrics"].is_string());

    let response = router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ready_reports_checks() {
    let dir = TempDir::new().unwrap();
    let tools = dir.path().join("bin");
    std::fs::create_dir_all(&tools).unwrap();
    std::fs::write(tools.join("ffmpeg"), b"").unwrap();
    std::fs::write(tools.join("ffprobe"), b"").unwrap();
    let config = ApiConfig {
        temp_dir: dir.path().to_path_buf(),
        ..ApiConfig::default()
    };
    let state = AppState::with_ffmpeg(
        config,
        Some(FfmpegPaths::new(tools.join("ffmpeg"), tools.join("ffprobe"))),
    );
    let response = create_router(state, None).oneshot(get("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["checks"]["ffmpeg"]["status"], "ok");
    assert_eq!(json["checks"]["temp_dir"]["status"], "ok");
}

#[tokio::test]
async fn test_ready_degraded_when_ffmpeg_missing() {
    let app = test_app();
    let response = app.router.oneshot(get("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["ffmpeg"]["status"], "error");
    assert!(json["checks"]["ffmpeg"]["error"]
        .as_str()
        .unwrap()
        .contains("/nonexistent/pixnoise/ffmpeg"));
    assert_eq!(json["checks"]["temp_dir"]["status"], "ok");
}

#[tokio::test]
async fn test_ready_degraded_when_temp_missing() {
    let dir = TempDir::new().unwrap();
    let config = ApiConfig {
        temp_dir: dir.path().join("missing"),
        ..ApiConfig::default()
    };
    let state = AppState::with_ffmpeg(config, Some(FfmpegPaths::new("ffmpeg", "ffprobe")));
    let response = create_router(state, None).oneshot(get("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["temp_dir"]["status"], "error");
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let app = test_app();
    let response = app.router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_security_and_request_id_headers() {
    let app = test_app();
    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_process_image_png() {
    let app = test_app();
    let png = png_bytes(40, 30);
    let request = multipart_request(
        "/process_image",
        &[
            Part::File("cat.png", &png),
            Part::Text("perturb_prob", "0.5"),
            Part::Text("visual_debug", "true"),
        ],
    );

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=processed_cat.png"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let img = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (40, 30));
    let red = img.pixels().filter(|p| p.0 == [255, 0, 0]).count();
    assert_eq!(red, 600);
}

#[tokio::test]
async fn test_process_image_jpeg_name_returns_jpeg() {
    let app = test_app();
    let png = png_bytes(16, 16);
    let request = multipart_request("/process_image", &[Part::File("photo.JPEG", &png)]);

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_process_image_missing_file() {
    let app = test_app();
    let request = multipart_request("/process_image", &[Part::Text("perturb_prob", "0.1")]);

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["detail"], "Missing required field: file");
}

#[tokio::test]
async fn test_process_image_rejects_bad_fields() {
    let app = test_app();
    let png = png_bytes(8, 8);

    for (name, value) in [("perturb_prob", "1.5"), ("perturb_prob", "abc"), ("visual_debug", "maybe")] {
        let request = multipart_request(
            "/process_image",
            &[Part::File("a.png", &png), Part::Text(name, value)],
        );
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}={}", name, value);
    }
}

#[tokio::test]
async fn test_process_image_body_over_limit() {
    let dir = TempDir::new().unwrap();
    let config = ApiConfig {
        temp_dir: dir.path().to_path_buf(),
        max_body_size: 1024,
        ..ApiConfig::default()
    };
    let state = AppState::with_ffmpeg(config, None);
    let big = vec![7u8; 64 * 1024];
    // No Content-Length, so the limit trips while the multipart body is read
    let request = multipart_request("/process_image", &[Part::File("big.png", &big)]);

    let response = create_router(state, None).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_process_image_undecodable_is_server_error() {
    let app = test_app();
    let request = multipart_request("/process_image", &[Part::File("a.png", b"not an image")]);

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .starts_with("Failed to process image"));
}

#[tokio::test]
async fn test_video_progress_unknown_task() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/video_progress/does-not-exist"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert_eq!(text.trim(), r#"data: {"error":"Task not found"}"#);
}

#[tokio::test]
async fn test_video_progress_stops_at_terminal_status() {
    let app = test_app();
    let id = TaskId::new();
    let mut task = TaskProgress::new("out.mp4", None);
    task.fail("boom");
    app.state.tasks.insert(id.clone(), task).await;

    let response = app
        .router
        .oneshot(get(&format!("/video_progress/{}", id)))
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    let events: Vec<_> = text.lines().filter(|l| l.starts_with("data: ")).collect();
    assert_eq!(events.len(), 1);
    let json: serde_json::Value = serde_json::from_str(&events[0]["data: ".len()..]).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "boom");
}

#[tokio::test]
async fn test_video_progress_streams_until_completed() {
    let app = test_app();
    let id = TaskId::new();
    let mut task = TaskProgress::new("out.mp4", None);
    task.start("Starting...");
    app.state.tasks.insert(id.clone(), task).await;

    let tasks = app.state.tasks.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        tasks
            .update(&task_id, |t| t.update(5, 10, "Perturbing frames"))
            .await;
        tokio::time::sleep(Duration::from_millis(800)).await;
        tasks
            .update(&task_id, |t| {
                t.complete(VideoMetadata {
                    fps: 25.0,
                    total_frames: 10,
                    has_audio: false,
                })
            })
            .await;
    });

    let started = std::time::Instant::now();
    let response = app
        .router
        .oneshot(get(&format!("/video_progress/{}", id)))
        .await
        .unwrap();
    let bytes = tokio::time::timeout(Duration::from_secs(10), to_bytes(response.into_body(), usize::MAX))
        .await
        .unwrap()
        .unwrap();
    let elapsed = started.elapsed();

    let text = String::from_utf8_lossy(&bytes);
    let events: Vec<serde_json::Value> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    // Immediate event, then one every 500ms until the task completes at ~1.2s
    assert!(events.len() >= 3, "got {} events", events.len());
    assert!(elapsed >= Duration::from_millis(1000));
    assert_eq!(events[0]["status"], "processing");
    assert!(events
        .iter()
        .any(|e| e["info"] == "Perturbing frames" && e["current"] == 5));
    let last = events.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress"], 100);
    assert!(events[..events.len() - 1]
        .iter()
        .all(|e| e["status"] == "processing"));
}

#[tokio::test]
async fn test_video_result_states() {
    let app = test_app();

    let response = app.router.clone().oneshot(get("/video_result/unknown")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Task not found");

    let pending = TaskId::new();
    app.state
        .tasks
        .insert(pending.clone(), TaskProgress::new("out.mp4", None))
        .await;
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/video_result/{}", pending)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "Video processing not finished");

    let missing = TaskId::new();
    let mut task = TaskProgress::new(
        app.dir.path().join("output_gone.mp4").display().to_string(),
        None,
    );
    task.complete(VideoMetadata {
        fps: 25.0,
        total_frames: 10,
        has_audio: false,
    });
    app.state.tasks.insert(missing.clone(), task).await;
    let response = app
        .router
        .oneshot(get(&format!("/video_result/{}", missing)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Output file not found");
}

#[tokio::test]
async fn test_video_result_download() {
    let app = test_app();
    let output = app.dir.path().join("output_done.mp4");
    std::fs::write(&output, b"fake mp4 bytes").unwrap();

    let id = TaskId::new();
    let mut task = TaskProgress::new(output.display().to_string(), Some("holiday.mov".into()));
    task.complete(VideoMetadata {
        fps: 30.0,
        total_frames: 3,
        has_audio: true,
    });
    app.state.tasks.insert(id.clone(), task).await;

    let response = app
        .router
        .oneshot(get(&format!("/video_result/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"processed_holiday.mov\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"fake mp4 bytes");
}

#[tokio::test]
async fn test_process_video_accepts_and_fails_without_ffmpeg() {
    let app = test_app();
    let request = multipart_request(
        "/process_video",
        &[
            Part::File("clip.mov", b"definitely not a video"),
            Part::Text("perturb_prob", "0.02"),
        ],
    );

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let id = TaskId::from_string(json["task_id"].as_str().unwrap());

    let mut task = None;
    for _ in 0..100 {
        let current = app.state.tasks.get(&id).await.unwrap();
        if current.is_terminal() {
            task = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let task = task.expect("task should finish");

    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.filename.as_deref(), Some("clip.mov"));
    assert!(task.output_path.ends_with(".mp4"));

    // Input is removed once the task finishes; nothing else is left behind.
    let leftovers: Vec<_> = std::fs::read_dir(app.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
}

#[tokio::test]
async fn test_process_video_missing_file() {
    let app = test_app();
    let request = multipart_request("/process_video", &[Part::Text("visual_debug", "1")]);

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
