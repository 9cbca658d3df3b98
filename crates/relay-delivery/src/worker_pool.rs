//! Worker pool lifecycle management.
//!
//! Spawns the configured number of worker loops and supervises their
//! shutdown: cancellation is signalled through a shared token, then each
//! join handle is awaited under a grace period. Dropping a still-running
//! pool cancels the workers so no orphaned loops outlive the engine.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ForwardError, Result};

/// Supervised set of spawned worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Wraps already-spawned worker handles under one cancellation token.
    pub(crate) fn new(handles: Vec<JoinHandle<()>>, cancel: CancellationToken) -> Self {
        info!(worker_count = handles.len(), "worker pool started");
        Self { handles, cancel }
    }

    /// Signals cancellation and waits for every worker to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::ShutdownTimeout`] if workers do not finish
    /// within the grace period; they may still be running.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.handles.len(),
            timeout_secs = timeout.as_secs(),
            "shutting down worker pool"
        );

        self.cancel.cancel();

        let handles = std::mem::take(&mut self.handles);
        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked");
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                info!("worker pool shutdown complete");
                Ok(())
            },
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "worker shutdown timed out");
                Err(ForwardError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Number of workers still running.
    pub fn active_count(&self) -> usize {
        self.handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Whether any worker is still running.
    pub fn has_active_workers(&self) -> bool {
        self.active_count() > 0
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.active_count();
        if active > 0 && !self.cancel.is_cancelled() {
            warn!(
                active_workers = active,
                "worker pool dropped without graceful shutdown, cancelling workers"
            );
            self.cancel.cancel();
        }
    }
}
