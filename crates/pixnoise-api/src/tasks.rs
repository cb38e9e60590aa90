//! In-memory registry of video tasks.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use pixnoise_models::{TaskId, TaskProgress};

/// Progress snapshots keyed by task id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskProgress>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: TaskId, progress: TaskProgress) {
        self.tasks.write().await.insert(id, progress);
    }

    /// Snapshot of a task.
    pub async fn get(&self, id: &TaskId) -> Option<TaskProgress> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Apply `f` to a task in place. Unknown ids are ignored; returns whether
    /// the task existed.
    pub async fn update<F>(&self, id: &TaskId, f: F) -> bool
    where
        F: FnOnce(&mut TaskProgress),
    {
        match self.tasks.write().await.get_mut(id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &TaskId) -> Option<TaskProgress> {
        self.tasks.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Terminal tasks last updated more than `retention` ago.
    pub async fn expired(&self, retention: Duration) -> Vec<(TaskId, TaskProgress)> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        self.tasks
            .read()
            .await
            .iter()
            .filter(|(_, task)| task.is_terminal() && now - task.updated_at > retention)
            .map(|(id, task)| (id.clone(), task.clone()))
            .collect()
    }
}
