//! Task domain model and strongly-typed identifiers.
//!
//! Defines the forwarded-request task, its lifecycle status machine, and the
//! snapshot view returned to polling callers. Task bodies are opaque byte
//! sequences; the forwarding core is schema-agnostic.

use std::{collections::HashMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed task identifier.
///
/// Wraps a UUID v4 generated at submission. The identifier is the caller's
/// only handle on a task: submission returns it immediately and all later
/// status polling goes through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Creates a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
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

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Task lifecycle status.
///
/// Transitions are monotonic and one-directional:
///
/// ```text
/// Pending -> Processing -> Completed
///                       -> Failed
/// ```
///
/// A task never re-enters an earlier state after leaving it, and terminal
/// states never transition out. The [`TaskStore`](crate::store::TaskStore)
/// rejects any other change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted and queued; no worker has picked it up yet.
    Pending,

    /// A worker owns the task and the upstream call is in flight.
    Processing,

    /// Terminal: the upstream responded and the result is stored.
    Completed,

    /// Terminal: forwarding failed and the error message is stored.
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the lifecycle permits moving from this status to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Upstream response payload stored on a completed task.
///
/// The body is kept as text, truncated by the client before it reaches the
/// store, so the view serializes cleanly for polling callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    /// HTTP status code the upstream returned.
    pub status: u16,
    /// Response headers, minus hop-by-hop entries.
    pub headers: HashMap<String, String>,
    /// Response body text (possibly truncated).
    pub body: String,
}

/// A forwarded request tracked through its lifecycle.
///
/// Created at submission as `Pending`, mutated by exactly one worker during
/// processing and at the terminal transition, and removed only by the
/// explicit age-based cleanup operation.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique identifier, generated at submission.
    pub id: TaskId,
    /// HTTP method to forward with.
    pub method: String,
    /// Request path (including query string) on the target.
    pub path: String,
    /// Request headers, already stripped of managed entries.
    pub headers: HashMap<String, String>,
    /// Opaque request body.
    pub body: Bytes,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task last changed status.
    pub updated_at: DateTime<Utc>,
    /// Upstream response, present only once completed.
    pub result: Option<UpstreamResponse>,
    /// Failure description, present only once failed.
    pub error: Option<String>,
    /// True when the forwarding call outlived the long-task threshold.
    pub is_long_task: bool,
}

impl Task {
    /// Creates a new pending task stamped with the given submission time.
    pub fn new(
        id: TaskId,
        method: impl Into<String>,
        path: impl Into<String>,
        headers: HashMap<String, String>,
        body: Bytes,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            path: path.into(),
            headers,
            body,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            is_long_task: false,
        }
    }

    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Read-only snapshot of a task returned to polling callers.
///
/// `result` is populated only for completed tasks and `error` only for
/// failed ones; pending and processing snapshots carry timestamps and the
/// long-task flag alone.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status-change timestamp.
    pub updated_at: DateTime<Utc>,
    /// Long-task classification flag.
    pub is_long_task: bool,
    /// Upstream response, completed tasks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UpstreamResponse>,
    /// Failure description, failed tasks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            is_long_task: task.is_long_task,
            result: match task.status {
                TaskStatus::Completed => task.result.clone(),
                _ => None,
            },
            error: match task.status {
                TaskStatus::Failed => task.error.clone(),
                _ => None,
            },
        }
    }
}

/// Per-status task counts reported by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    /// Tasks waiting in the queue.
    pub pending: usize,
    /// Tasks currently owned by a worker.
    pub processing: usize,
    /// Tasks that completed with an upstream response.
    pub completed: usize,
    /// Tasks that terminated with a failure.
    pub failed: usize,
    /// Tasks whose forwarding call exceeded the long-task threshold.
    pub long_tasks: usize,
}
