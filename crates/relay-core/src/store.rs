//! Concurrent in-memory task store.
//!
//! The store is the single shared-mutation point for task records. All
//! access goes through a coarse read-write lock; individual operations hold
//! it only long enough to copy or mutate one record, so no public operation
//! blocks beyond lock acquisition. Records survive until an explicit
//! age-based cleanup removes terminal ones; nothing is deleted
//! automatically. The store is process-local and intentionally not
//! persistent: tasks still pending at shutdown are lost.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    models::{Task, TaskCounts, TaskId, TaskStatus, TaskView, UpstreamResponse},
    time::Clock,
};

/// Concurrent map from task identifier to task record.
///
/// Status transitions are validated against the task lifecycle: a worker can
/// move a task `pending -> processing` exactly once, and only a processing
/// task can reach a terminal state. Violations return
/// [`CoreError::InvalidTransition`] instead of silently rewriting history.
#[derive(Debug)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    /// Creates an empty store stamping timestamps from the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { tasks: RwLock::new(HashMap::new()), clock }
    }

    /// Inserts a freshly-created task record.
    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.id, task);
    }

    /// Removes a record regardless of status, returning whether it existed.
    ///
    /// Used to roll back a submission the admission queue rejected; cleanup
    /// goes through [`cleanup_older_than`](Self::cleanup_older_than).
    pub async fn remove(&self, id: TaskId) -> bool {
        self.tasks.write().await.remove(&id).is_some()
    }

    /// Returns a snapshot of the task, or `None` if unknown.
    ///
    /// Never blocks on in-flight processing; the snapshot is whatever the
    /// record held at the moment the read lock was acquired.
    pub async fn get(&self, id: TaskId) -> Option<TaskView> {
        self.tasks.read().await.get(&id).map(TaskView::from)
    }

    /// Marks a pending task as processing and returns its record.
    ///
    /// The returned clone carries the request parts (method, path, headers,
    /// body) the worker needs to build the upstream call.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] for unknown ids and
    /// [`CoreError::InvalidTransition`] if the task is not pending.
    pub async fn begin_processing(&self, id: TaskId) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(CoreError::TaskNotFound { id })?;

        if !task.status.can_transition_to(TaskStatus::Processing) {
            return Err(CoreError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Processing,
            });
        }

        task.status = TaskStatus::Processing;
        task.updated_at = self.clock.now_utc();
        Ok(task.clone())
    }

    /// Marks a processing task as completed with the upstream response.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] for unknown ids and
    /// [`CoreError::InvalidTransition`] if the task is not processing.
    pub async fn complete(
        &self,
        id: TaskId,
        result: UpstreamResponse,
        is_long_task: bool,
    ) -> Result<()> {
        self.finish(id, TaskStatus::Completed, Some(result), None, is_long_task).await
    }

    /// Marks a processing task as failed with an error description.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] for unknown ids and
    /// [`CoreError::InvalidTransition`] if the task is not processing.
    pub async fn fail(&self, id: TaskId, error: String, is_long_task: bool) -> Result<()> {
        self.finish(id, TaskStatus::Failed, None, Some(error), is_long_task).await
    }

    async fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: Option<UpstreamResponse>,
        error: Option<String>,
        is_long_task: bool,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(CoreError::TaskNotFound { id })?;

        if !task.status.can_transition_to(status) {
            return Err(CoreError::InvalidTransition { from: task.status, to: status });
        }

        task.status = status;
        task.updated_at = self.clock.now_utc();
        task.result = result;
        task.error = error;
        task.is_long_task = is_long_task;
        Ok(())
    }

    /// Lists task snapshots, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Vec<TaskView> {
        let tasks = self.tasks.read().await;
        let mut views: Vec<TaskView> = tasks
            .values()
            .filter(|task| status.map_or(true, |wanted| task.status == wanted))
            .map(TaskView::from)
            .collect();

        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views.truncate(limit);
        views
    }

    /// Removes terminal tasks created more than `max_age` ago.
    ///
    /// Pending and processing records are never removed regardless of age.
    /// Returns the number of records dropped.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> usize {
        // An age bound beyond representable time matches nothing.
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| self.clock.now_utc().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !(task.is_terminal() && task.created_at < cutoff));
        before - tasks.len()
    }

    /// Per-status counts for stats reporting.
    pub async fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read().await;
        let mut counts = TaskCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
            if task.is_long_task {
                counts.long_tasks += 1;
            }
        }
        counts
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
