//! Bounded task scheduler.
//!
//! `submit` inserts a queued record and spawns the job; a semaphore sized
//! to the worker count is the only admission control, excess jobs wait on
//! it. The tasks map and the metrics counters each sit behind their own
//! lock, held only across a map mutation, never across rendering or I/O.
//!
//! This is the one layer that turns a typed failure into a user-facing
//! string; everything below it works with message keys and logs the raw
//! detail here.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use photomark_core::i18n::{self, Language};
use photomark_core::models::task::{TaskRecord, TaskResult, TaskStatus};
use photomark_core::WatermarkError;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type JobOutcome = Result<PathBuf, WatermarkError>;

/// Aggregate completion counters, updated under the metrics lock at every
/// terminal transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub total_submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl Metrics {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    pub fn failure_rate(&self) -> f64 {
        if self.completed() == 0 {
            return 0.0;
        }
        self.failed as f64 / self.completed() as f64
    }
}

struct SchedulerState {
    tasks: Mutex<HashMap<Uuid, TaskRecord>>,
    metrics: Mutex<Metrics>,
    semaphore: Arc<Semaphore>,
}

/// Progress reporter handed to the running job. Updates are best-effort
/// read-modify-write under the tasks lock and never move backwards.
#[derive(Clone)]
pub struct ProgressHandle {
    state: Arc<SchedulerState>,
    id: Uuid,
}

impl ProgressHandle {
    pub fn update(&self, progress: f32, stage: &str) {
        let mut tasks = self.state.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&self.id) {
            task.update_progress(progress, Some(stage));
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    state: Arc<SchedulerState>,
}

impl Scheduler {
    pub fn new(worker_count: usize) -> Self {
        Scheduler {
            state: Arc::new(SchedulerState {
                tasks: Mutex::new(HashMap::new()),
                metrics: Mutex::new(Metrics::default()),
                semaphore: Arc::new(Semaphore::new(worker_count)),
            }),
        }
    }

    /// Queue a job and return its task id. Never blocks beyond the map
    /// insertion; the job waits for a worker slot inside its own task.
    pub fn submit<F, Fut>(&self, language: Language, job: F) -> Uuid
    where
        F: FnOnce(ProgressHandle) -> Fut + Send + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let record = TaskRecord::new_queued();
        let id = record.id;

        let queue_depth = {
            let mut tasks = self.state.tasks.lock().unwrap();
            tasks.insert(id, record);
            tasks
                .values()
                .filter(|t| !t.status.is_terminal())
                .count()
        };
        let metrics = {
            let mut metrics = self.state.metrics.lock().unwrap();
            metrics.total_submitted += 1;
            *metrics
        };
        info!(
            task_id = %id,
            queue_depth,
            failure_rate = metrics.failure_rate(),
            "task submitted"
        );

        let state = self.state.clone();
        tokio::spawn(async move {
            let permit = state
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("scheduler semaphore closed");
            let started = Instant::now();

            {
                let mut tasks = state.tasks.lock().unwrap();
                if let Some(task) = tasks.get_mut(&id) {
                    task.status = TaskStatus::Processing;
                    task.stage = "processing".to_string();
                }
            }

            let handle = ProgressHandle {
                state: state.clone(),
                id,
            };
            let outcome = job(handle).await;
            drop(permit);

            finish(&state, id, outcome, language, started.elapsed());
        });

        id
    }

    pub fn status(&self, id: Uuid) -> Option<TaskRecord> {
        self.state.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn metrics(&self) -> Metrics {
        *self.state.metrics.lock().unwrap()
    }

    /// Evict records older than the retention window, terminal or not, and
    /// return how many were removed.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        // A retention too large to represent keeps everything.
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d));
        let Some(cutoff) = cutoff else { return 0 };
        let mut tasks = self.state.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, task| task.submitted_at > cutoff);
        let removed = before - tasks.len();
        if removed > 0 {
            info!(removed, remaining = tasks.len(), "swept expired task records");
        }
        removed
    }
}

/// Terminal transition: record result or localized error, bump counters,
/// log the completion.
fn finish(
    state: &Arc<SchedulerState>,
    id: Uuid,
    outcome: JobOutcome,
    language: Language,
    duration: Duration,
) {
    let succeeded = outcome.is_ok();
    {
        let mut tasks = state.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&id) {
            match &outcome {
                Ok(output) => {
                    task.status = TaskStatus::Succeeded;
                    task.update_progress(1.0, Some("done"));
                    let filename = output
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default()
                        .to_string();
                    task.result = Some(TaskResult {
                        output_path: output.clone(),
                        download_url: format!("/download/{}", filename),
                    });
                }
                Err(err) => {
                    task.status = TaskStatus::Failed;
                    task.stage = "failed".to_string();
                    task.error = Some(localized_message(err, language));
                }
            }
        }
    }

    let metrics = {
        let mut metrics = state.metrics.lock().unwrap();
        if succeeded {
            metrics.succeeded += 1;
        } else {
            metrics.failed += 1;
        }
        *metrics
    };
    let queue_depth = {
        let tasks = state.tasks.lock().unwrap();
        tasks.values().filter(|t| !t.status.is_terminal()).count()
    };

    match &outcome {
        Ok(output) => info!(
            task_id = %id,
            output = %output.display(),
            duration_ms = duration.as_millis() as u64,
            queue_depth,
            failure_rate = metrics.failure_rate(),
            "task succeeded"
        ),
        Err(err) => {
            if let Some(detail) = err.detail() {
                warn!(task_id = %id, detail, "failure detail");
            }
            error!(
                task_id = %id,
                key = err.message_key(),
                duration_ms = duration.as_millis() as u64,
                queue_depth,
                failure_rate = metrics.failure_rate(),
                "task failed"
            );
        }
    }
}

/// The user sees only the localized message for the error's key; raw detail
/// stays in the logs. The unsupported-manufacturer name is the one detail
/// worth showing.
fn localized_message(err: &WatermarkError, language: Language) -> String {
    let base = i18n::message_or_generic(err.message_key(), language);
    match err {
        WatermarkError::UnsupportedManufacturer { manufacturer } => {
            format!("{} ({})", base, manufacturer)
        }
        _ => base.to_string(),
    }
}
