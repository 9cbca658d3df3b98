//! Task polling, listing, and cleanup handlers.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_core::{TaskId, TaskStatus, TaskView};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use super::TaskResponse;
use crate::AppState;

/// Returns the current view of a task.
///
/// The response shape varies by status: completed tasks include the
/// upstream result, failed ones the error, pending and processing ones
/// only timestamps and the long-task flag.
#[instrument(name = "task_status", skip(state))]
pub async fn task_status(
    Path(task_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Response {
    let Some(view) = state.service.query(TaskId::from(task_id)).await else {
        return not_found(task_id);
    };

    let response = match view.status {
        TaskStatus::Completed => TaskResponse {
            success: true,
            task_id: Some(view.task_id.to_string()),
            status: view.status.to_string(),
            message: "task completed".to_string(),
            data: Some(metadata(&view, true)),
            result: view.result,
            error: None,
        },
        TaskStatus::Failed => TaskResponse {
            success: false,
            task_id: Some(view.task_id.to_string()),
            status: view.status.to_string(),
            message: "task failed".to_string(),
            data: Some(metadata(&view, false)),
            result: None,
            error: view.error,
        },
        TaskStatus::Pending | TaskStatus::Processing => TaskResponse {
            success: true,
            task_id: Some(view.task_id.to_string()),
            status: view.status.to_string(),
            message: format!("task is {}, poll again later", view.status),
            data: Some(metadata(&view, true)),
            result: None,
            error: None,
        },
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Result-oriented polling endpoint.
///
/// Same information as `/task/{id}` with messages phrased around result
/// availability, for clients that only care whether output is ready.
#[instrument(name = "task_result", skip(state))]
pub async fn task_result(
    Path(task_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Response {
    let Some(view) = state.service.query(TaskId::from(task_id)).await else {
        return not_found(task_id);
    };

    let message = match view.status {
        TaskStatus::Pending => "task queued, not started yet",
        TaskStatus::Processing => "task in progress, poll again later",
        TaskStatus::Completed => "task completed",
        TaskStatus::Failed => "task failed",
    };

    let response = TaskResponse {
        success: view.status != TaskStatus::Failed,
        task_id: Some(view.task_id.to_string()),
        status: view.status.to_string(),
        message: message.to_string(),
        data: Some(metadata(&view, view.status == TaskStatus::Completed)),
        result: view.result,
        error: view.error,
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Query parameters of the task listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Restrict to one lifecycle status.
    pub status: Option<TaskStatus>,
    /// Maximum entries returned, newest first.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Listing response: matched count plus the task views.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Number of tasks returned.
    pub count: usize,
    /// Task snapshots, newest first.
    pub tasks: Vec<TaskView>,
}

/// Lists tasks newest-first, optionally filtered by status.
#[instrument(name = "list_tasks", skip(state))]
pub async fn list_tasks(
    Query(query): Query<ListQuery>,
    State(state): State<AppState>,
) -> Json<ListResponse> {
    let tasks = state.service.list(query.status, query.limit).await;
    Json(ListResponse { count: tasks.len(), tasks })
}

/// Query parameters of the cleanup operation.
#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    /// Age bound in hours; terminal tasks older than this are removed.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
}

fn default_max_age_hours() -> u64 {
    24
}

/// Removes terminal tasks older than the given age.
#[instrument(name = "cleanup_tasks", skip(state))]
pub async fn cleanup_tasks(
    Query(query): Query<CleanupQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let max_age = Duration::from_secs(query.max_age_hours.saturating_mul(3600));
    let removed = state.service.cleanup(max_age).await;

    Json(json!({
        "success": true,
        "removed_count": removed,
        "message": format!("removed {removed} tasks older than {}h", query.max_age_hours),
    }))
}

fn metadata(view: &TaskView, with_long_flag: bool) -> serde_json::Value {
    let mut data = json!({
        "created_at": view.created_at,
        "updated_at": view.updated_at,
    });
    if with_long_flag {
        if let Some(data) = data.as_object_mut() {
            data.insert("is_long_task".to_string(), json!(view.is_long_task));
        }
    }
    data
}

fn not_found(task_id: Uuid) -> Response {
    let response = TaskResponse {
        success: false,
        task_id: Some(task_id.to_string()),
        status: "unknown".to_string(),
        message: format!("task not found: {task_id}"),
        data: None,
        result: None,
        error: Some(format!("task not found: {task_id}")),
    };
    (StatusCode::NOT_FOUND, Json(response)).into_response()
}
