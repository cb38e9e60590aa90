//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 6869;

/// Default working directory for uploads and outputs.
pub const DEFAULT_TEMP_DIR: &str = "temp";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory holding uploads, outputs and work directories
    pub temp_dir: PathBuf,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Concurrent image requests
    pub image_max_workers: usize,
    /// Concurrent video uploads and pipelines
    pub video_max_workers: usize,
    /// Threads per video used to perturb frames (None = all cores but two)
    pub frame_workers: Option<usize>,
    /// How long finished tasks are kept
    pub task_retention: Duration,
    /// How often expired tasks are swept
    pub sweep_interval: Duration,
    /// How long shutdown waits for running videos
    pub shutdown_timeout: Duration,
    /// Kill any single FFmpeg step running longer than this (None = no limit)
    pub ffmpeg_step_timeout: Option<u64>,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let cpus = cpu_count();
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            cors_origins: vec!["*".to_string()],
            max_body_size: 512 * 1024 * 1024, // 512MB
            image_max_workers: image_workers_for(cpus),
            video_max_workers: video_workers_for(cpus),
            frame_workers: None,
            task_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            ffmpeg_step_timeout: None,
            metrics_enabled: true,
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PIXNOISE_HOST").unwrap_or(defaults.host),
            port: env_parse("PIXNOISE_PORT").unwrap_or(defaults.port),
            temp_dir: std::env::var("PIXNOISE_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            image_max_workers: env_parse("IMAGE_MAX_WORKERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.image_max_workers),
            video_max_workers: env_parse("VIDEO_MAX_WORKERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.video_max_workers),
            frame_workers: env_parse("FRAME_WORKERS").filter(|n: &usize| *n > 0),
            task_retention: env_parse("TASK_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_retention),
            sweep_interval: env_parse("TASK_SWEEP_INTERVAL_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            shutdown_timeout: env_parse("SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            ffmpeg_step_timeout: env_parse("FFMPEG_STEP_TIMEOUT_SECS").filter(|n: &u64| *n > 0),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Image requests are quick, so allow roughly one per core within [4, 12].
pub fn image_workers_for(cpus: usize) -> usize {
    cpus.min(12).max(4)
}

/// Each video already fans out over all cores, so keep this small.
pub fn video_workers_for(cpus: usize) -> usize {
    match cpus {
        0..=4 => 1,
        5..=8 => 2,
        _ => (cpus / 4).min(3),
    }
}
