//! The Background Task Manager (§4.10): wraps long-running ingestion jobs
//! with a lifecycle (`pending -> running -> {completed, failed}`) and
//! age-based cleanup. Background tasks are cooperatively cancellable; a
//! cancelled ingestion task does not roll back already-committed stage
//! outputs (idempotent re-ingest is the recovery path, §5).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use copilot_core::TaskId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub kind: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskRecord {
    fn new(kind: impl Into<String>, metadata: HashMap<String, Value>) -> Self {
        Self {
            task_id: TaskId::new(),
            kind: kind.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata,
            result: None,
            error: None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// `create_task` spawns `future` on the Tokio runtime and tracks its
/// lifecycle; callers get a [`TaskId`] back immediately (§6 "Returns
/// `{task_id, status_endpoint}` immediately; real work is background").
pub struct BackgroundTaskManager {
    tasks: Arc<DashMap<TaskId, Arc<RwLock<TaskRecord>>>>,
    cancellations: Arc<DashMap<TaskId, CancellationToken>>,
    // Serializes cleanup passes so a concurrent sweep can't race a task's
    // own completion update.
    cleanup_lock: Mutex<()>,
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            cleanup_lock: Mutex::new(()),
        }
    }
}

impl BackgroundTaskManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates and spawns a task. `work` receives a [`CancellationToken`] it
    /// should check cooperatively and must resolve to `Ok(Value)` /
    /// `Err(String)`.
    pub fn create_task<F, Fut>(
        self: &Arc<Self>,
        kind: impl Into<String>,
        metadata: HashMap<String, Value>,
        work: F,
    ) -> TaskId
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let record = TaskRecord::new(kind, metadata);
        let task_id = record.task_id;
        let handle = Arc::new(RwLock::new(record));
        self.tasks.insert(task_id, handle.clone());

        let cancel = CancellationToken::new();
        self.cancellations.insert(task_id, cancel.clone());

        tokio::spawn(async move {
            {
                let mut record = handle.write().await;
                record.status = TaskStatus::Running;
                record.started_at = Some(Utc::now());
            }

            let outcome = work(cancel).await;

            let mut record = handle.write().await;
            record.completed_at = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    record.status = TaskStatus::Completed;
                    record.result = Some(value);
                }
                Err(message) => {
                    warn!(task_id = %task_id, error = %message, "background task failed");
                    record.status = TaskStatus::Failed;
                    record.error = Some(message);
                }
            }
        });

        task_id
    }

    pub async fn status(&self, task_id: TaskId) -> Option<TaskRecord> {
        let handle = self.tasks.get(&task_id)?.clone();
        let record = handle.read().await;
        Some(record.clone())
    }

    /// Cooperative cancellation: signals the token; does not force-kill the
    /// spawned task and never rolls back already-committed stage outputs.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.cancellations.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for entry in self.tasks.iter() {
            let record = entry.value().read().await;
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Removes terminal tasks older than `max_age_hours` (§6 `DELETE
    /// /tasks/cleanup?max_age_hours=H`). Returns the number removed.
    pub async fn cleanup(&self, max_age_hours: i64) -> usize {
        let _guard = self.cleanup_lock.lock().await;
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours);
        let mut stale = Vec::new();

        for entry in self.tasks.iter() {
            let record = entry.value().read().await;
            let terminal_at = record.completed_at;
            if record.is_terminal() && terminal_at.map(|t| t < cutoff).unwrap_or(false) {
                stale.push(*entry.key());
            }
        }

        for task_id in &stale {
            self.tasks.remove(task_id);
            self.cancellations.remove(task_id);
        }

        if !stale.is_empty() {
            info!(count = stale.len(), "cleaned up stale background tasks");
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_transitions_from_pending_to_completed() {
        let manager = BackgroundTaskManager::new();
        let task_id = manager.create_task("ingest_document", HashMap::new(), |_cancel| async move {
            Ok(serde_json::json!({"chunks": 3}))
        });

        // Give the spawned task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let record = manager.status(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn failed_tasks_carry_an_error_message() {
        let manager = BackgroundTaskManager::new();
        let task_id = manager.create_task("ingest_document", HashMap::new(), |_cancel| async move {
            Err("extractor failed".to_string())
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let record = manager.status(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("extractor failed"));
    }

    #[tokio::test]
    async fn cleanup_only_removes_terminal_tasks_older_than_cutoff() {
        let manager = BackgroundTaskManager::new();
        let task_id = manager.create_task("ingest_document", HashMap::new(), |_cancel| async move {
            Ok(Value::Null)
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let removed = manager.cleanup(24).await;
        assert_eq!(removed, 0, "a task completed moments ago is not yet stale");
        assert!(manager.status(task_id).await.is_some());

        let removed_immediately = manager.cleanup(-1).await;
        assert_eq!(removed_immediately, 1);
        assert!(manager.status(task_id).await.is_none());
    }

    #[tokio::test]
    async fn cancel_signals_the_cooperative_token() {
        let manager = BackgroundTaskManager::new();
        let task_id = manager.create_task("ingest_batch", HashMap::new(), |cancel| async move {
            cancel.cancelled().await;
            Ok(serde_json::json!({"cancelled": true}))
        });

        assert!(manager.cancel(task_id));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let record = manager.status(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }
}
