//! Video processing tasks and their progress snapshots.
//!
//! A task is created when a video upload is accepted and is polled by clients
//! through the progress stream until it reaches a terminal status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::video::VideoMetadata;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Upload accepted, nothing started yet
    #[default]
    Pending,
    /// Pipeline is running
    Processing,
    /// Output is ready for download
    Completed,
    /// Pipeline failed
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress snapshot of a video task, as pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskProgress {
    /// Units of work done in the current step
    pub current: u64,
    /// Units of work in the current step
    pub total: u64,
    /// Human-readable step description
    pub info: String,
    pub status: TaskStatus,
    /// Percentage of the current step (0-100)
    pub progress: u8,
    /// Where the processed video is written
    pub output_path: String,
    /// Original upload name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    /// Create a pending task entry.
    pub fn new(output_path: impl Into<String>, filename: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            current: 0,
            total: 100,
            info: "Preparing...".to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            output_path: output_path.into(),
            filename,
            error: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the upload as stored and processing as started.
    pub fn start(&mut self, info: impl Into<String>) {
        self.status = TaskStatus::Processing;
        self.info = info.into();
        self.updated_at = Utc::now();
    }

    /// Record step progress reported by the pipeline.
    pub fn update(&mut self, current: u64, total: u64, info: impl Into<String>) {
        self.current = current;
        self.total = total;
        self.info = info.into();
        self.status = TaskStatus::Processing;
        self.progress = percent(current, total);
        self.updated_at = Utc::now();
    }

    /// Mark task as completed.
    pub fn complete(&mut self, metadata: VideoMetadata) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.metadata = Some(metadata);
        self.updated_at = Utc::now();
    }

    /// Mark task as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Download name for the processed output.
    pub fn download_name(&self) -> String {
        format!(
            "processed_{}",
            self.filename.as_deref().unwrap_or("processed_video.mp4")
        )
    }
}

fn percent(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).floor().min(100.0) as u8
}
