//! Task model shared between the scheduler and the web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of a watermark task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Reference to the produced output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub output_path: PathBuf,
    pub download_url: String,
}

/// In-memory task record. Mutated only by the executing worker and evicted
/// by the retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskStatus,
    /// Monotonically non-decreasing, in `[0, 1]`.
    pub progress: f32,
    pub stage: String,
    pub submitted_at: DateTime<Utc>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new_queued() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Queued,
            progress: 0.0,
            stage: "queued".to_string(),
            submitted_at: Utc::now(),
            result: None,
            error: None,
        }
    }

    /// Apply a progress update; progress never regresses and is clamped to 1.
    pub fn update_progress(&mut self, progress: f32, stage: Option<&str>) {
        self.progress = self.progress.max(progress.min(1.0));
        if let Some(stage) = stage {
            self.stage = stage.to_string();
        }
    }
}
