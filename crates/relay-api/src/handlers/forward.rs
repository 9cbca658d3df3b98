//! Submission handlers: the forwarding catch-all and explicit task creation.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use relay_delivery::ForwardError;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{sanitized_headers, TaskResponse};
use crate::AppState;

/// Accepts an arbitrary `POST /api/...` request for forwarding.
///
/// Body and headers are forwarded verbatim minus the managed header set.
/// Always answers immediately: 202 with the task id on acceptance, 503
/// when the admission queue is full.
#[instrument(name = "forward_api", skip(state, headers, body), fields(path = %path))]
pub async fn forward_api(
    Path(path): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let headers = sanitized_headers(&headers);
    submit_response(&state, "POST", format!("/api/{path}"), headers, body, None).await
}

/// Body of an explicit task-creation request.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Target path to forward to, e.g. `/api/users`.
    pub path: String,
    /// HTTP method, defaults to POST.
    #[serde(default = "default_method")]
    pub method: String,
    /// Query parameters appended to the path.
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Optional request body.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Creates a task from an explicit JSON description.
///
/// Unlike the catch-all route this lets the caller pick the method, path,
/// and query parameters; `params` are url-encoded into the forwarded path.
#[instrument(name = "create_task", skip(state, headers, request), fields(path = %request.path))]
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&request.params)
        .finish();
    let full_path =
        if query.is_empty() { request.path.clone() } else { format!("{}?{}", request.path, query) };

    let body = request.body.map(Bytes::from).unwrap_or_default();
    let headers = sanitized_headers(&headers);

    let extra = json!({ "path": request.path, "method": request.method });
    submit_response(&state, &request.method, full_path, headers, body, Some(extra)).await
}

/// Runs a submission and shapes the HTTP answer.
async fn submit_response(
    state: &AppState,
    method: &str,
    path: String,
    headers: HashMap<String, String>,
    body: Bytes,
    extra_data: Option<serde_json::Value>,
) -> Response {
    match state.service.submit(method, path, headers, body).await {
        Ok(task_id) => {
            info!(task_id = %task_id, "task accepted");

            let mut data = json!({
                "task_id": task_id.to_string(),
                "status_url": format!("/task/{task_id}"),
            });
            if let Some(extra) = extra_data {
                if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
                    data.extend(extra.clone());
                    data.insert(
                        "result_url".to_string(),
                        json!(format!("/api/task/{task_id}/result")),
                    );
                }
            }

            let response = TaskResponse {
                success: true,
                task_id: Some(task_id.to_string()),
                status: "pending".to_string(),
                message: format!("task accepted, poll /task/{task_id} for status"),
                data: Some(data),
                result: None,
                error: None,
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        },
        Err(rejection @ ForwardError::QueueFull { .. }) => {
            warn!(error = %rejection, "submission rejected");
            let response = TaskResponse {
                success: false,
                task_id: None,
                status: "rejected".to_string(),
                message: rejection.to_string(),
                data: None,
                result: None,
                error: Some(rejection.to_string()),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
        },
        Err(error) => {
            warn!(error = %error, "submission failed");
            let response = TaskResponse {
                success: false,
                task_id: None,
                status: "error".to_string(),
                message: format!("failed to create task: {error}"),
                data: None,
                result: None,
                error: Some(error.to_string()),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        },
    }
}
