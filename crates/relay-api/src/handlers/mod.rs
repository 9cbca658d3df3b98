//! Request handlers for the relay HTTP surface.

mod forward;
mod stats;
mod tasks;

pub use forward::{create_task, forward_api};
pub use stats::{liveness, service_info, stats};
pub use tasks::{cleanup_tasks, list_tasks, task_result, task_status};

use std::collections::HashMap;

use axum::http::HeaderMap;
use relay_core::UpstreamResponse;
use serde::Serialize;

/// Envelope shared by task-oriented responses.
///
/// Which optional fields are populated depends on the task's status:
/// completed tasks carry `result`, failed ones `error`, and pending or
/// processing ones only the metadata under `data`.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    /// Whether the request itself succeeded.
    pub success: bool,
    /// Task identifier, when one is involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Task or request status label.
    pub status: String,
    /// Human-readable description of the outcome.
    pub message: String,
    /// Status-dependent metadata (timestamps, polling URLs, flags).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Upstream response, completed tasks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UpstreamResponse>,
    /// Failure description, failed tasks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Headers the relay manages itself and never forwards.
const SKIP_HEADERS: [&str; 4] = ["host", "connection", "accept-encoding", "content-length"];

/// Copies forwardable headers out of the inbound request.
pub(crate) fn sanitized_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if SKIP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_headers_strip_managed_entries() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "relay.internal".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("accept-encoding", "gzip".parse().unwrap());
        headers.insert("content-length", "42".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-trace-id", "abc123".parse().unwrap());

        let sanitized = sanitized_headers(&headers);

        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized.get("content-type").unwrap(), "application/json");
        assert_eq!(sanitized.get("x-trace-id").unwrap(), "abc123");
    }
}
