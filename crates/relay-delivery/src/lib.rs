//! Forwarding engine with bounded concurrency and failure isolation.
//!
//! This crate implements the asynchronous half of the relay service: a
//! bounded admission queue absorbs submission bursts, a pool of workers
//! drains it under a concurrency limiter, and every upstream call passes
//! through a circuit breaker and a pooled HTTP client with retry/backoff.
//! Results land in the task store for callers to poll.
//!
//! # Architecture
//!
//! ```text
//! submit ──▶ AdmissionQueue ──▶ ForwardWorker ──▶ CircuitBreaker gate
//!   │              │                 │                   │
//!   ▼              ▼                 ▼                   ▼
//! TaskStore    backpressure      Semaphore          HttpForwarder
//! (pending)    (503 on full)   (max_concurrent)    (pool + retries)
//! ```
//!
//! Submission never blocks: a full queue is an immediate, caller-visible
//! rejection. Completion order is not submission order; callers poll by
//! task id.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod service;
mod worker;
pub mod worker_pool;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot};
pub use client::{ClientConfig, ForwardOutcome, ForwardRequest, Forwarder, HttpForwarder};
pub use error::{ForwardError, Result};
pub use metrics::{ForwardMetrics, MetricsSnapshot};
pub use queue::AdmissionQueue;
pub use service::{ServiceConfig, ServiceStats, TaskService};
pub use worker::EngineConfig;
pub use worker_pool::WorkerPool;

/// Default number of worker pulling loops.
pub const DEFAULT_NUM_WORKERS: usize = 5;

/// Default ceiling on simultaneously in-flight upstream calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default admission queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default long-task threshold in seconds.
pub const DEFAULT_LONG_TASK_THRESHOLD_SECS: u64 = 300;
