//! Background removal of finished tasks and their outputs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info, warn};

use pixnoise_media::fs_utils::remove_file_if_exists;

use crate::metrics;
use crate::tasks::TaskRegistry;

/// Periodically drops terminal tasks older than the retention period.
pub struct TaskSweeper {
    tasks: Arc<TaskRegistry>,
    retention: Duration,
    every: Duration,
}

impl TaskSweeper {
    pub fn new(tasks: Arc<TaskRegistry>, retention: Duration, every: Duration) -> Self {
        Self {
            tasks,
            retention,
            every,
        }
    }

    /// Run forever; spawn this as a background task.
    pub async fn run(&self) {
        info!(
            "Starting task sweeper (retention: {:?}, interval: {:?})",
            self.retention, self.every
        );

        let mut ticker = interval(self.every);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// Remove expired tasks and their output files. Returns how many were removed.
    pub async fn sweep_once(&self) -> usize {
        let expired = self.tasks.expired(self.retention).await;
        if expired.is_empty() {
            return 0;
        }

        for (id, task) in &expired {
            self.tasks.remove(id).await;
            if task.output_path.is_empty() {
                continue;
            }
            match remove_file_if_exists(Path::new(&task.output_path)).await {
                Ok(()) => debug!(task_id = %id, "Removed expired output {}", task.output_path),
                Err(e) => warn!(task_id = %id, "Failed to remove {}: {}", task.output_path, e),
            }
        }

        let remaining = self.tasks.len().await;
        metrics::record_tasks_swept(expired.len(), remaining);
        info!("Swept {} expired tasks ({} remaining)", expired.len(), remaining);
        expired.len()
    }
}
