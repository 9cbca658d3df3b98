//! Stats, health, and service-info handlers.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use relay_delivery::ServiceStats;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::AppState;

/// Aggregate stats response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Overall health label: healthy, degraded, or unhealthy.
    pub status: &'static str,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Echo of the startup configuration.
    pub config: ConfigEcho,
    /// Live pipeline statistics.
    pub metrics: ServiceStats,
}

/// Startup configuration echoed for operators.
#[derive(Debug, Serialize)]
pub struct ConfigEcho {
    /// Forwarding target, host:port.
    pub target: String,
    /// In-flight upstream call ceiling.
    pub max_concurrent: usize,
    /// Admission queue capacity.
    pub max_queue_size: usize,
    /// Worker loop count.
    pub num_workers: usize,
    /// Upstream connect timeout in seconds.
    pub connect_timeout_seconds: u64,
    /// Upstream read timeout in seconds.
    pub read_timeout_seconds: u64,
    /// Connection pools kept by the client.
    pub pool_connections: usize,
    /// Pooled connection ceiling per host.
    pub pool_maxsize: usize,
    /// Extra attempts for retryable failures.
    pub max_retries: u32,
    /// Breaker failure threshold.
    pub circuit_breaker_threshold: u32,
    /// Breaker cooldown in seconds.
    pub circuit_breaker_timeout_seconds: u64,
    /// Long-task threshold in seconds.
    pub long_task_threshold_seconds: u64,
}

/// Reports aggregate counters, latency percentiles, breaker state, and the
/// configuration echo.
///
/// Health is derived the same way operators eyeball it: an open breaker is
/// unhealthy, a success rate at or below 80% is degraded, anything else is
/// healthy.
#[instrument(name = "stats", skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.service.stats().await;

    let status = if stats.circuit.is_open {
        "unhealthy"
    } else if stats.metrics.total_requests > 0 && stats.metrics.success_rate <= 80.0 {
        "degraded"
    } else {
        "healthy"
    };

    let config = &state.config;
    Json(StatsResponse {
        status,
        timestamp: state.clock.now_utc(),
        config: ConfigEcho {
            target: format!("{}:{}", config.target_host, config.target_port),
            max_concurrent: config.max_concurrent,
            max_queue_size: config.max_queue_size,
            num_workers: config.num_workers,
            connect_timeout_seconds: config.connect_timeout_seconds,
            read_timeout_seconds: config.read_timeout_seconds,
            pool_connections: config.pool_connections,
            pool_maxsize: config.pool_maxsize,
            max_retries: config.max_retries,
            circuit_breaker_threshold: config.circuit_breaker_threshold,
            circuit_breaker_timeout_seconds: config.circuit_breaker_timeout_seconds,
            long_task_threshold_seconds: config.long_task_threshold_seconds,
        },
        metrics: stats,
    })
}

/// Service banner at the root path.
#[instrument(name = "service_info", skip(state))]
pub async fn service_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "target": state.config.target_base_url(),
        "endpoints": {
            "forward": "POST /api/{path}",
            "create_task": "POST /api/task/create",
            "task_status": "GET /task/{task_id}",
            "task_result": "GET /api/task/{task_id}/result",
            "list_tasks": "GET /tasks?status=&limit=",
            "cleanup": "DELETE /tasks/cleanup?max_age_hours=",
            "stats": "GET /stats",
        },
    }))
}

/// Liveness probe: answers as long as the process serves requests.
#[instrument(name = "liveness", skip(state))]
pub async fn liveness(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "relay",
    }))
}
