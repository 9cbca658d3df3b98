//! Rolling forwarding metrics.
//!
//! Aggregates attempt counters with bounded windows of recent response-time
//! samples and error descriptions. Percentiles and the success rate are
//! derived at snapshot time from whatever the windows currently hold, so
//! the recorder stays cheap on the hot path.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use relay_core::Clock;
use serde::Serialize;
use tokio::sync::Mutex;

/// Capacity of the response-time sample window.
pub const RESPONSE_TIME_WINDOW: usize = 1000;

/// Capacity of the recent-error window.
pub const ERROR_WINDOW: usize = 100;

/// A recent failure, kept for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSample {
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
    /// Failure description.
    pub message: String,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    timeout_requests: u64,
    queue_rejected: u64,
    response_times: VecDeque<Duration>,
    recent_errors: VecDeque<ErrorSample>,
}

/// Thread-safe recorder of forwarding outcomes.
#[derive(Debug)]
pub struct ForwardMetrics {
    clock: Arc<dyn Clock>,
    state: Mutex<MetricsState>,
}

/// Point-in-time metrics for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Attempts recorded, successes and failures alike.
    pub total_requests: u64,
    /// Attempts classified as successful.
    pub successful_requests: u64,
    /// Attempts classified as failed.
    pub failed_requests: u64,
    /// Failed attempts that were timeouts.
    pub timeout_requests: u64,
    /// Submissions rejected by the full admission queue.
    pub queue_rejected: u64,
    /// Rolling success rate as a percentage (0 when no attempts yet).
    pub success_rate: f64,
    /// Mean response time over the sample window, in milliseconds.
    pub avg_response_ms: f64,
    /// Median response time, in milliseconds.
    pub p50_response_ms: f64,
    /// 95th-percentile response time, in milliseconds.
    pub p95_response_ms: f64,
    /// 99th-percentile response time, in milliseconds.
    pub p99_response_ms: f64,
    /// Most recent failure descriptions, oldest first.
    pub recent_errors: Vec<ErrorSample>,
}

impl ForwardMetrics {
    /// Creates an empty recorder.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, state: Mutex::new(MetricsState::default()) }
    }

    /// Records one completed forwarding attempt.
    ///
    /// Every attempt contributes a response-time sample; failures also push
    /// an entry into the error window.
    pub async fn record_attempt(
        &self,
        duration: Duration,
        success: bool,
        is_timeout: bool,
        error: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        state.total_requests += 1;

        if state.response_times.len() >= RESPONSE_TIME_WINDOW {
            state.response_times.pop_front();
        }
        state.response_times.push_back(duration);

        if success {
            state.successful_requests += 1;
        } else {
            state.failed_requests += 1;
            let message = error.unwrap_or("forwarding failed").to_string();
            if state.recent_errors.len() >= ERROR_WINDOW {
                state.recent_errors.pop_front();
            }
            let at = self.clock.now_utc();
            state.recent_errors.push_back(ErrorSample { at, message });
        }

        if is_timeout {
            state.timeout_requests += 1;
        }
    }

    /// Records a submission rejected by the full queue.
    pub async fn record_rejected(&self) {
        self.state.lock().await.queue_rejected += 1;
    }

    /// Derives a snapshot from the current counters and windows.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().await;

        let mut samples_ms: Vec<f64> =
            state.response_times.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        samples_ms.sort_by(|a, b| a.total_cmp(b));

        let avg_response_ms = if samples_ms.is_empty() {
            0.0
        } else {
            samples_ms.iter().sum::<f64>() / samples_ms.len() as f64
        };

        let success_rate = if state.total_requests == 0 {
            0.0
        } else {
            state.successful_requests as f64 / state.total_requests as f64 * 100.0
        };

        MetricsSnapshot {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            timeout_requests: state.timeout_requests,
            queue_rejected: state.queue_rejected,
            success_rate,
            avg_response_ms,
            p50_response_ms: percentile(&samples_ms, 0.50),
            p95_response_ms: percentile(&samples_ms, 0.95),
            p99_response_ms: percentile(&samples_ms, 0.99),
            recent_errors: state.recent_errors.iter().cloned().collect(),
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted sample set.
fn percentile(sorted_samples: &[f64], quantile: f64) -> f64 {
    if sorted_samples.is_empty() {
        return 0.0;
    }
    let rank = ((sorted_samples.len() - 1) as f64 * quantile).round() as usize;
    sorted_samples[rank.min(sorted_samples.len() - 1)]
}

#[cfg(test)]
mod tests {
    use relay_core::TestClock;

    use super::*;

    fn test_metrics() -> ForwardMetrics {
        ForwardMetrics::new(Arc::new(TestClock::new()))
    }

    #[tokio::test]
    async fn counters_track_outcomes() {
        let metrics = test_metrics();

        metrics.record_attempt(Duration::from_millis(10), true, false, None).await;
        metrics.record_attempt(Duration::from_millis(20), false, false, Some("HTTP 502")).await;
        metrics.record_attempt(Duration::from_millis(30), false, true, Some("timed out")).await;
        metrics.record_rejected().await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.timeout_requests, 1);
        assert_eq!(snapshot.queue_rejected, 1);
        assert!((snapshot.success_rate - 33.33).abs() < 0.1);
        assert_eq!(snapshot.recent_errors.len(), 2);
        assert_eq!(snapshot.recent_errors[0].message, "HTTP 502");
    }

    #[tokio::test]
    async fn empty_snapshot_is_all_zero() {
        let snapshot = test_metrics().snapshot().await;
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.avg_response_ms, 0.0);
        assert_eq!(snapshot.p99_response_ms, 0.0);
        assert!(snapshot.recent_errors.is_empty());
    }

    #[tokio::test]
    async fn percentiles_reflect_distribution() {
        let metrics = test_metrics();
        for ms in 1..=100u64 {
            metrics.record_attempt(Duration::from_millis(ms), true, false, None).await;
        }

        let snapshot = metrics.snapshot().await;
        assert!((snapshot.avg_response_ms - 50.5).abs() < 0.01);
        assert!((snapshot.p50_response_ms - 51.0).abs() <= 1.0);
        assert!((snapshot.p95_response_ms - 95.0).abs() <= 1.0);
        assert!((snapshot.p99_response_ms - 99.0).abs() <= 1.0);
    }

    #[tokio::test]
    async fn sample_windows_are_bounded() {
        let metrics = test_metrics();

        for i in 0..(RESPONSE_TIME_WINDOW + 50) {
            let failed = format!("failure {i}");
            metrics.record_attempt(Duration::from_millis(1), false, false, Some(&failed)).await;
        }

        let state = metrics.state.lock().await;
        assert_eq!(state.response_times.len(), RESPONSE_TIME_WINDOW);
        assert_eq!(state.recent_errors.len(), ERROR_WINDOW);
        // Oldest entries are evicted first.
        let first = &state.recent_errors[0].message;
        assert_eq!(first, &format!("failure {}", RESPONSE_TIME_WINDOW + 50 - ERROR_WINDOW));
    }

    #[test]
    fn percentile_of_singleton() {
        assert_eq!(percentile(&[42.0], 0.5), 42.0);
        assert_eq!(percentile(&[42.0], 0.99), 42.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
