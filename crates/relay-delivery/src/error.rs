//! Error taxonomy for forwarding operations.
//!
//! Distinguishes the failure classes the service cares about:
//! backpressure rejections (caller-visible and retryable), upstream
//! unreachability and timeouts (recorded against the circuit breaker),
//! synthetic breaker rejections (never recorded as upstream failures), and
//! configuration or internal faults. Every per-task failure is captured into
//! the task record; none of these crash a worker loop.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for forwarding operations.
pub type Result<T> = std::result::Result<T, ForwardError>;

/// Failure classes of the forwarding pipeline.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    /// The admission queue is at capacity; the submission was rejected.
    ///
    /// This is the system's only backpressure signal. Callers should retry
    /// later; the queue size is unchanged by the rejected attempt.
    #[error("task queue full: {depth} queued tasks (capacity {capacity}), try again later")]
    QueueFull {
        /// Queue depth observed at rejection time
        depth: usize,
        /// Fixed queue capacity
        capacity: usize,
    },

    /// Connection refused, DNS failure, or other network-level fault.
    #[error("upstream unreachable: {message}")]
    Unreachable {
        /// Description of the network failure
        message: String,
    },

    /// The upstream did not answer within the read timeout.
    #[error("upstream timed out after {timeout_seconds}s")]
    Timeout {
        /// Read timeout that was exceeded, in seconds
        timeout_seconds: u64,
    },

    /// Circuit breaker rejected the call before any network attempt.
    #[error("circuit breaker open: upstream is failing, request rejected without forwarding")]
    CircuitOpen,

    /// The forwarding request could not be constructed.
    #[error("invalid forwarding configuration: {message}")]
    Configuration {
        /// Description of the configuration problem
        message: String,
    },

    /// Worker shutdown exceeded its grace period.
    #[error("worker shutdown timed out after {}s", timeout.as_secs())]
    ShutdownTimeout {
        /// Grace period that was exceeded
        timeout: Duration,
    },

    /// Task store rejected an operation.
    #[error("task store error: {0}")]
    Store(#[from] relay_core::CoreError),

    /// Unexpected internal fault.
    #[error("internal forwarding error: {message}")]
    Internal {
        /// Description of the fault
        message: String,
    },
}

impl ForwardError {
    /// Creates an unreachable-upstream error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// The HTTP status this failure maps to when surfaced to a caller.
    pub fn equivalent_status(&self) -> u16 {
        match self {
            Self::QueueFull { .. } | Self::CircuitOpen => 503,
            Self::Unreachable { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::Configuration { .. } => 400,
            Self::ShutdownTimeout { .. } | Self::Store(_) | Self::Internal { .. } => 500,
        }
    }

    /// Whether this failure counts against the circuit breaker.
    ///
    /// Only real upstream faults do. Breaker rejections are synthetic and
    /// must not feed back into the failure count; queue rejections and
    /// configuration errors never reached the network.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }
}
