//! Circuit breaker for upstream protection.
//!
//! Tracks consecutive upstream failures and fails fast once a threshold is
//! crossed, sparing a struggling upstream from further traffic for a
//! cooldown period. After the cooldown the breaker resets its counter and
//! lets one trial call through; the trial's outcome either keeps the
//! breaker closed or starts accumulating failures again.
//!
//! Breaker rejections are synthesized by the caller without any network
//! I/O and must not be recorded as upstream failures; only real call
//! outcomes go through [`CircuitBreaker::record`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use relay_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Circuit breaker tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
///
/// The breaker is open iff `consecutive_failures >= failure_threshold` and
/// the cooldown has not yet elapsed since it opened. A single recorded
/// success closes it and clears all state.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

/// Point-in-time breaker state for stats reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CircuitSnapshot {
    /// Whether the breaker is currently rejecting calls.
    pub is_open: bool,
    /// Consecutive failures recorded so far.
    pub consecutive_failures: u32,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given configuration.
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, state: Mutex::new(BreakerState::default()) }
    }

    /// Whether the next upstream call may proceed.
    ///
    /// Checked before every call. When the cooldown has elapsed the breaker
    /// resets its failure count and admits the call as a trial; until then
    /// an open breaker rejects every caller.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.consecutive_failures < self.config.failure_threshold {
            return true;
        }

        match state.opened_at {
            Some(opened_at) => {
                if self.clock.now().duration_since(opened_at) > self.config.cooldown {
                    info!("circuit breaker cooldown elapsed, admitting trial call");
                    state.consecutive_failures = 0;
                    state.opened_at = None;
                    true
                } else {
                    false
                }
            },
            // Threshold reached without a stamp (e.g. state restored from a
            // snapshot); open now and start the cooldown.
            None => {
                state.opened_at = Some(self.clock.now());
                false
            },
        }
    }

    /// Records the outcome of a real upstream call.
    ///
    /// A success clears the failure count and closes the breaker; a failure
    /// increments the count and opens the breaker when it newly crosses the
    /// threshold.
    pub async fn record(&self, success: bool) {
        let mut state = self.state.lock().await;
        if success {
            state.consecutive_failures = 0;
            state.opened_at = None;
            return;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures == self.config.failure_threshold {
            warn!(
                consecutive_failures = state.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opening"
            );
            state.opened_at = Some(self.clock.now());
        }
    }

    /// Current breaker state without mutating it.
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock().await;
        let is_open = state.consecutive_failures >= self.config.failure_threshold
            && match state.opened_at {
                Some(opened_at) => {
                    self.clock.now().duration_since(opened_at) <= self.config.cooldown
                },
                None => true,
            };
        CircuitSnapshot { is_open, consecutive_failures: state.consecutive_failures }
    }
}

#[cfg(test)]
mod tests {
    use relay_core::TestClock;

    use super::*;

    fn test_breaker(threshold: u32, cooldown: Duration) -> (CircuitBreaker, TestClock) {
        let clock = TestClock::new();
        let config = CircuitConfig { failure_threshold: threshold, cooldown };
        (CircuitBreaker::new(config, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn starts_closed() {
        let (breaker, _clock) = test_breaker(3, Duration::from_secs(60));
        assert!(breaker.allow().await);
        assert!(!breaker.snapshot().await.is_open);
    }

    #[tokio::test]
    async fn opens_at_threshold() {
        let (breaker, _clock) = test_breaker(3, Duration::from_secs(60));

        breaker.record(false).await;
        breaker.record(false).await;
        assert!(breaker.allow().await);

        breaker.record(false).await;
        assert!(!breaker.allow().await);
        assert!(breaker.snapshot().await.is_open);
    }

    #[tokio::test]
    async fn rejects_every_caller_while_open() {
        let (breaker, clock) = test_breaker(2, Duration::from_secs(60));

        breaker.record(false).await;
        breaker.record(false).await;

        clock.advance(Duration::from_secs(30));
        for _ in 0..10 {
            assert!(!breaker.allow().await);
        }
    }

    #[tokio::test]
    async fn cooldown_elapse_admits_trial_and_resets() {
        let (breaker, clock) = test_breaker(2, Duration::from_secs(60));

        breaker.record(false).await;
        breaker.record(false).await;
        assert!(!breaker.allow().await);

        clock.advance(Duration::from_secs(61));
        assert!(breaker.allow().await);

        let snapshot = breaker.snapshot().await;
        assert!(!snapshot.is_open);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn single_success_closes_breaker() {
        let (breaker, _clock) = test_breaker(2, Duration::from_secs(60));

        breaker.record(false).await;
        breaker.record(false).await;
        assert!(!breaker.allow().await);

        breaker.record(true).await;
        assert!(breaker.allow().await);
        assert_eq!(breaker.snapshot().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn failed_trial_accumulates_from_zero() {
        let (breaker, clock) = test_breaker(2, Duration::from_secs(10));

        breaker.record(false).await;
        breaker.record(false).await;
        clock.advance(Duration::from_secs(11));
        assert!(breaker.allow().await);

        // The failed trial is one failure against a reset counter, so the
        // breaker stays closed until the threshold is crossed again.
        breaker.record(false).await;
        assert!(breaker.allow().await);
        breaker.record(false).await;
        assert!(!breaker.allow().await);
    }
}
