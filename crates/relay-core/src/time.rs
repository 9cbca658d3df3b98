//! Clock abstraction for testable timing.
//!
//! All duration measurement in the pipeline (forwarding elapsed time,
//! circuit-breaker cooldowns, long-task classification, cleanup cutoffs)
//! goes through an injected [`Clock`] so tests can drive time
//! deterministically instead of sleeping.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Time source for the forwarding pipeline.
///
/// Production code uses [`RealClock`]; tests inject a [`TestClock`] whose
/// monotonic and wall-clock readings advance only on demand.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic instant, for duration measurement.
    fn now(&self) -> Instant;

    /// Current wall-clock time, for task timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    ///
    /// Maps to `tokio::time::sleep` in production; a test clock advances
    /// its own time instead of waiting.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System-time clock used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually-advanced clock for deterministic tests.
///
/// Both readings start at construction time and move only through
/// [`advance`](TestClock::advance) or [`sleep`](Clock::sleep). Clones share
/// the same underlying counters, so a test can hold one handle while the
/// component under test holds another.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Nanoseconds advanced since construction.
    elapsed_ns: Arc<AtomicU64>,
    /// Monotonic anchor taken at construction.
    base_instant: Instant,
    /// Wall-clock anchor taken at construction, as nanoseconds since epoch.
    base_epoch_ns: u64,
}

impl TestClock {
    /// Creates a test clock anchored at the current time.
    pub fn new() -> Self {
        let epoch_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0).max(0);
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_epoch_ns: u64::try_from(epoch_ns).unwrap_or(0),
        }
    }

    /// Advances both monotonic and wall-clock readings.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let total_ns = self.base_epoch_ns.saturating_add(self.elapsed_ns.load(Ordering::Acquire));
        DateTime::from_timestamp_nanos(i64::try_from(total_ns).unwrap_or(i64::MAX))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        // Yield so other tasks observing the clock get a chance to run.
        Box::pin(tokio::task::yield_now())
    }
}
