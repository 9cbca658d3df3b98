//! Worker loop draining the admission queue.
//!
//! Each worker repeatedly dequeues one task, acquires a concurrency permit,
//! and walks the task through its lifecycle: mark processing, pass the
//! circuit-breaker gate, forward upstream, record metrics and breaker
//! outcome, and write the terminal state. The permit is an owned RAII guard
//! so it is released on every path. One bad task never kills the loop;
//! per-task failures are logged and the worker moves on.

use std::{sync::Arc, time::Duration};

use relay_core::{Clock, TaskStore, UpstreamResponse};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    circuit::CircuitBreaker,
    client::{ForwardRequest, Forwarder},
    error::{ForwardError, Result},
    metrics::ForwardMetrics,
    queue::AdmissionQueue,
};

/// Engine tuning parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker pulling loops.
    ///
    /// May exceed or fall short of `max_concurrent`; actual parallelism is
    /// capped by the limiter acquired before each upstream call.
    pub num_workers: usize,
    /// Ceiling on simultaneously in-flight upstream calls.
    pub max_concurrent: usize,
    /// Forwarding calls that outlive this are flagged as long tasks.
    pub long_task_threshold: Duration,
    /// Scheme, host, and port of the upstream, e.g. `http://10.0.0.5:8000`.
    pub target_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_workers: crate::DEFAULT_NUM_WORKERS,
            max_concurrent: crate::DEFAULT_MAX_CONCURRENT,
            long_task_threshold: Duration::from_secs(crate::DEFAULT_LONG_TASK_THRESHOLD_SECS),
            target_base_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// A single pulling loop over the admission queue.
pub(crate) struct ForwardWorker {
    id: usize,
    store: Arc<TaskStore>,
    queue: Arc<AdmissionQueue>,
    forwarder: Arc<dyn Forwarder>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<ForwardMetrics>,
    limiter: Arc<Semaphore>,
    config: EngineConfig,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl ForwardWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        store: Arc<TaskStore>,
        queue: Arc<AdmissionQueue>,
        forwarder: Arc<dyn Forwarder>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<ForwardMetrics>,
        limiter: Arc<Semaphore>,
        config: EngineConfig,
        cancel: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, store, queue, forwarder, breaker, metrics, limiter, config, cancel, clock }
    }

    /// Runs until the cancellation token fires.
    pub(crate) async fn run(self) {
        info!(worker_id = self.id, "forward worker starting");

        loop {
            let task_id = tokio::select! {
                () = self.cancel.cancelled() => break,
                id = self.queue.dequeue() => id,
            };

            let permit = tokio::select! {
                () = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break, // limiter closed, engine is gone
                },
            };

            if let Err(e) = self.process(task_id).await {
                error!(worker_id = self.id, task_id = %task_id, error = %e, "task processing failed");
            }

            drop(permit);
        }

        info!(worker_id = self.id, "forward worker stopped");
    }

    /// Drives one task to a terminal state.
    ///
    /// Only store-level faults (unknown task, lifecycle violation) propagate
    /// as errors; upstream failures are captured into the task record.
    async fn process(&self, task_id: relay_core::TaskId) -> Result<()> {
        let task = self.store.begin_processing(task_id).await?;

        if !self.breaker.allow().await {
            let rejection = ForwardError::CircuitOpen;
            // Synthetic rejection: no network attempt, no breaker record.
            self.metrics
                .record_attempt(Duration::ZERO, false, false, Some(&rejection.to_string()))
                .await;
            self.store.fail(task_id, rejection.to_string(), false).await?;
            warn!(worker_id = self.id, task_id = %task_id, "circuit open, task rejected without forwarding");
            return Ok(());
        }

        let request = ForwardRequest {
            task_id,
            method: task.method.clone(),
            url: format!("{}{}", self.config.target_base_url, task.path),
            headers: task.headers.clone(),
            body: task.body.clone(),
        };

        debug!(worker_id = self.id, task_id = %task_id, url = %request.url, "forwarding task");

        let started = self.clock.now();
        let result = self.forwarder.forward(request).await;
        let elapsed = self.clock.now().duration_since(started);
        let is_long_task = elapsed >= self.config.long_task_threshold;

        match result {
            Ok(outcome) => {
                self.breaker.record(outcome.success).await;
                let failure_note = (!outcome.success)
                    .then(|| format!("upstream returned HTTP {}", outcome.status));
                self.metrics
                    .record_attempt(elapsed, outcome.success, outcome.is_timeout, failure_note.as_deref())
                    .await;

                if outcome.success {
                    info!(
                        worker_id = self.id,
                        task_id = %task_id,
                        status = outcome.status,
                        duration_ms = elapsed.as_millis(),
                        is_long_task,
                        "task completed"
                    );
                } else {
                    warn!(
                        worker_id = self.id,
                        task_id = %task_id,
                        status = outcome.status,
                        duration_ms = elapsed.as_millis(),
                        "upstream error response delivered to task"
                    );
                }

                // The response is delivered as-is even for 5xx; the breaker
                // and metrics already saw the failure.
                let response = UpstreamResponse {
                    status: outcome.status,
                    headers: outcome.headers,
                    body: outcome.body,
                };
                self.store.complete(task_id, response, is_long_task).await?;
            },
            Err(failure) => {
                if failure.is_upstream_failure() {
                    self.breaker.record(false).await;
                }
                let is_timeout = matches!(failure, ForwardError::Timeout { .. });
                self.metrics
                    .record_attempt(elapsed, false, is_timeout, Some(&failure.to_string()))
                    .await;
                warn!(
                    worker_id = self.id,
                    task_id = %task_id,
                    error = %failure,
                    duration_ms = elapsed.as_millis(),
                    "task failed"
                );
                self.store.fail(task_id, failure.to_string(), is_long_task).await?;
            },
        }

        Ok(())
    }
}
