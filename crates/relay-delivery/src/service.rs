//! Externally callable task service façade.
//!
//! Owns every moving part of the forwarding pipeline (store, queue,
//! metrics, breaker, limiter, and worker pool) as one explicitly
//! constructed object. There are no module-level singletons: the binary
//! builds one service at startup and tests build a fresh one per case.
//!
//! No operation here blocks the caller beyond lock acquisition. Submission
//! either queues and returns a task id or rejects immediately; queries and
//! listings read snapshots; cleanup touches only terminal records.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use relay_core::{
    Clock, Task, TaskCounts, TaskId, TaskStatus, TaskStore, TaskView,
};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot},
    client::{ClientConfig, Forwarder, HttpForwarder},
    error::{ForwardError, Result},
    metrics::{ForwardMetrics, MetricsSnapshot},
    queue::AdmissionQueue,
    worker::{EngineConfig, ForwardWorker},
    worker_pool::WorkerPool,
};

/// Full configuration of the task service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Admission queue capacity.
    pub queue_capacity: usize,
    /// Worker pool and forwarding parameters.
    pub engine: EngineConfig,
    /// Upstream HTTP client parameters.
    pub client: ClientConfig,
    /// Circuit breaker parameters.
    pub circuit: CircuitConfig,
    /// Grace period for worker shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            engine: EngineConfig::default(),
            client: ClientConfig::default(),
            circuit: CircuitConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate statistics returned by [`TaskService::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Rolling forwarding metrics.
    pub metrics: MetricsSnapshot,
    /// Per-status task counts.
    pub tasks: TaskCounts,
    /// Items currently queued for pickup.
    pub queue_depth: usize,
    /// Fixed queue capacity.
    pub queue_capacity: usize,
    /// Worker loops currently running.
    pub active_workers: usize,
    /// Concurrency limiter permits currently free.
    pub available_slots: usize,
    /// Upstream calls currently in flight.
    pub in_flight: usize,
    /// Circuit breaker state.
    pub circuit: CircuitSnapshot,
}

/// The forwarding service: submit, query, list, cleanup, stats.
pub struct TaskService {
    store: Arc<TaskStore>,
    queue: Arc<AdmissionQueue>,
    metrics: Arc<ForwardMetrics>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<Semaphore>,
    forwarder: Arc<dyn Forwarder>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    cancel: CancellationToken,
    pool: Mutex<Option<WorkerPool>>,
}

impl TaskService {
    /// Creates a service with the production HTTP forwarder.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built from the
    /// configuration.
    pub fn new(config: ServiceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let forwarder = Arc::new(HttpForwarder::new(config.client.clone(), Arc::clone(&clock))?);
        Ok(Self::with_forwarder(config, clock, forwarder))
    }

    /// Creates a service with an injected forwarder.
    ///
    /// Tests use this seam to substitute counting, failing, or
    /// clock-advancing upstream doubles.
    pub fn with_forwarder(
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        let store = Arc::new(TaskStore::new(Arc::clone(&clock)));
        let queue = Arc::new(AdmissionQueue::new(config.queue_capacity));
        let metrics = Arc::new(ForwardMetrics::new(Arc::clone(&clock)));
        let breaker =
            Arc::new(CircuitBreaker::new(config.circuit.clone(), Arc::clone(&clock)));
        let limiter = Arc::new(Semaphore::new(config.engine.max_concurrent));

        Self {
            store,
            queue,
            metrics,
            breaker,
            limiter,
            forwarder,
            clock,
            config,
            cancel: CancellationToken::new(),
            pool: Mutex::new(None),
        }
    }

    /// Spawns the worker pool. Idempotent: a second call is a no-op.
    pub async fn start(&self) {
        let mut pool_slot = self.pool.lock().await;
        if pool_slot.is_some() {
            return;
        }

        info!(
            num_workers = self.config.engine.num_workers,
            max_concurrent = self.config.engine.max_concurrent,
            queue_capacity = self.config.queue_capacity,
            target = %self.config.engine.target_base_url,
            "starting forwarding workers"
        );

        let handles = (0..self.config.engine.num_workers)
            .map(|worker_id| {
                let worker = ForwardWorker::new(
                    worker_id,
                    Arc::clone(&self.store),
                    Arc::clone(&self.queue),
                    Arc::clone(&self.forwarder),
                    Arc::clone(&self.breaker),
                    Arc::clone(&self.metrics),
                    Arc::clone(&self.limiter),
                    self.config.engine.clone(),
                    self.cancel.clone(),
                    Arc::clone(&self.clock),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        *pool_slot = Some(WorkerPool::new(handles, self.cancel.clone()));
    }

    /// Gracefully stops the worker pool.
    ///
    /// In-flight tasks get the configured grace period to finish; queued
    /// tasks stay pending and are lost with the in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::ShutdownTimeout`] if workers outlive the
    /// grace period.
    pub async fn shutdown(&self) -> Result<()> {
        let pool = self.pool.lock().await.take();
        match pool {
            Some(pool) => pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => Ok(()),
        }
    }

    /// Accepts a request for asynchronous forwarding.
    ///
    /// Inserts a pending record and queues it, returning the task id
    /// immediately. When the queue is full the record is rolled back and
    /// the submission fails with [`ForwardError::QueueFull`], a retryable,
    /// caller-visible rejection, never a silent drop.
    pub async fn submit(
        &self,
        method: impl Into<String>,
        path: impl Into<String>,
        headers: HashMap<String, String>,
        body: Bytes,
    ) -> Result<TaskId> {
        let id = TaskId::new();
        let task = Task::new(id, method, path, headers, body, self.clock.now_utc());
        self.store.insert(task).await;

        if !self.queue.try_enqueue(id).await {
            self.store.remove(id).await;
            self.metrics.record_rejected().await;
            let depth = self.queue.depth().await;
            warn!(task_id = %id, depth, "submission rejected, queue full");
            return Err(ForwardError::QueueFull { depth, capacity: self.queue.capacity() });
        }

        debug!(task_id = %id, "task accepted");
        Ok(id)
    }

    /// Returns a snapshot of the task, or `None` if unknown.
    pub async fn query(&self, id: TaskId) -> Option<TaskView> {
        self.store.get(id).await
    }

    /// Lists tasks newest-first, optionally filtered by status.
    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Vec<TaskView> {
        self.store.list(status, limit).await
    }

    /// Removes terminal tasks older than `max_age`; returns the count.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let removed = self.store.cleanup_older_than(max_age).await;
        if removed > 0 {
            info!(removed, max_age_secs = max_age.as_secs(), "cleaned up old tasks");
        }
        removed
    }

    /// Aggregate statistics: metrics, queue, limiter, breaker, task counts.
    pub async fn stats(&self) -> ServiceStats {
        let available_slots = self.limiter.available_permits();
        let active_workers =
            self.pool.lock().await.as_ref().map_or(0, WorkerPool::active_count);

        ServiceStats {
            metrics: self.metrics.snapshot().await,
            tasks: self.store.counts().await,
            queue_depth: self.queue.depth().await,
            queue_capacity: self.queue.capacity(),
            active_workers,
            available_slots,
            in_flight: self.config.engine.max_concurrent.saturating_sub(available_slots),
            circuit: self.breaker.snapshot().await,
        }
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
