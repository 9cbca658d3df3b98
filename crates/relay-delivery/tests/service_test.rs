//! End-to-end tests for the task service and forwarding engine.
//!
//! Exercises the full pipeline (submit, queue, workers, breaker, store)
//! against stub forwarders and a wiremock upstream: backpressure
//! rejections, breaker short-circuiting, timeout classification, long-task
//! flagging with a test clock, the concurrency ceiling, and FIFO pickup.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use relay_core::{Clock, RealClock, TaskId, TaskStatus, TaskView, TestClock};
use relay_delivery::{
    CircuitConfig, ClientConfig, EngineConfig, ForwardError, ForwardOutcome, ForwardRequest,
    Forwarder, Result, ServiceConfig, TaskService,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn outcome(status: u16) -> ForwardOutcome {
    ForwardOutcome {
        status,
        headers: HashMap::new(),
        body: format!("status {status}"),
        duration: Duration::from_millis(5),
        success: (200..500).contains(&status),
        is_timeout: false,
    }
}

/// Returns a fixed status and counts how often it was called.
struct StatusForwarder {
    status: u16,
    calls: AtomicUsize,
}

impl StatusForwarder {
    fn new(status: u16) -> Self {
        Self { status, calls: AtomicUsize::new(0) }
    }
}

impl Forwarder for StatusForwarder {
    fn forward(
        &self,
        _request: ForwardRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForwardOutcome>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.status;
        Box::pin(async move { Ok(outcome(status)) })
    }
}

/// Holds each call open for a while and tracks peak concurrency.
struct SlowForwarder {
    delay: Duration,
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

impl SlowForwarder {
    fn new(delay: Duration) -> Self {
        Self { delay, current: AtomicUsize::new(0), max_seen: AtomicUsize::new(0) }
    }
}

impl Forwarder for SlowForwarder {
    fn forward(
        &self,
        _request: ForwardRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForwardOutcome>> + Send + '_>> {
        Box::pin(async move {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(outcome(200))
        })
    }
}

/// Advances a shared test clock before answering, simulating a slow call.
struct ClockAdvancingForwarder {
    clock: TestClock,
    advance: Duration,
}

impl Forwarder for ClockAdvancingForwarder {
    fn forward(
        &self,
        _request: ForwardRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForwardOutcome>> + Send + '_>> {
        self.clock.advance(self.advance);
        Box::pin(async move { Ok(outcome(200)) })
    }
}

/// Records the order in which tasks reach the upstream.
struct RecordingForwarder {
    seen: Mutex<Vec<TaskId>>,
}

impl RecordingForwarder {
    fn new() -> Self {
        Self { seen: Mutex::new(Vec::new()) }
    }
}

impl Forwarder for RecordingForwarder {
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForwardOutcome>> + Send + '_>> {
        self.seen.lock().unwrap().push(request.task_id);
        Box::pin(async move { Ok(outcome(200)) })
    }
}

fn service_with(
    config: ServiceConfig,
    clock: Arc<dyn Clock>,
    forwarder: Arc<dyn Forwarder>,
) -> TaskService {
    TaskService::with_forwarder(config, clock, forwarder)
}

async fn submit_simple(service: &TaskService, path: &str) -> TaskId {
    service
        .submit("POST", path, HashMap::new(), Bytes::from_static(b"{}"))
        .await
        .expect("submission should be accepted")
}

/// Polls until the task reaches a terminal state.
async fn wait_terminal(service: &TaskService, id: TaskId) -> TaskView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(view) = service.query(id).await {
                if view.status.is_terminal() {
                    return view;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task should reach a terminal state")
}

#[tokio::test]
async fn submitted_task_is_immediately_observable_as_pending() {
    let service = service_with(
        ServiceConfig::default(),
        Arc::new(RealClock),
        Arc::new(StatusForwarder::new(200)),
    );
    // Workers not started: the task must sit in the queue as pending.
    let id = submit_simple(&service, "/api/run").await;

    let view = service.query(id).await.expect("task should be queryable");
    assert_eq!(view.status, TaskStatus::Pending);
    assert!(view.result.is_none());
    assert!(view.error.is_none());
}

#[tokio::test]
async fn query_unknown_task_returns_none() {
    let service = service_with(
        ServiceConfig::default(),
        Arc::new(RealClock),
        Arc::new(StatusForwarder::new(200)),
    );
    assert!(service.query(TaskId::new()).await.is_none());
}

#[tokio::test]
async fn full_queue_rejects_submission_and_leaves_depth_unchanged() {
    // Scenario: capacity 2, two pending placeholders already queued.
    let config = ServiceConfig { queue_capacity: 2, ..ServiceConfig::default() };
    let service =
        service_with(config, Arc::new(RealClock), Arc::new(StatusForwarder::new(200)));

    submit_simple(&service, "/api/one").await;
    submit_simple(&service, "/api/two").await;

    let error = service
        .submit("POST", "/api/three", HashMap::new(), Bytes::new())
        .await
        .expect_err("third submission should be rejected");

    let message = error.to_string();
    assert!(message.contains("queue"), "rejection should name the queue: {message}");
    assert!(message.contains('2'), "rejection should carry the queue size: {message}");
    assert!(matches!(error, ForwardError::QueueFull { depth: 2, capacity: 2 }));

    let stats = service.stats().await;
    assert_eq!(stats.queue_depth, 2);
    assert_eq!(stats.metrics.queue_rejected, 1);
    // The rejected task was rolled back, not left behind as a zombie record.
    assert_eq!(service.list(None, 10).await.len(), 2);
}

#[tokio::test]
async fn successful_forwarding_completes_task_with_result() {
    let service = service_with(
        ServiceConfig::default(),
        Arc::new(RealClock),
        Arc::new(StatusForwarder::new(200)),
    );
    service.start().await;

    let id = submit_simple(&service, "/api/run").await;
    let view = wait_terminal(&service, id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    let result = view.result.expect("completed task should carry the response");
    assert_eq!(result.status, 200);
    assert!(view.error.is_none());
    assert!(!view.is_long_task);

    let stats = service.stats().await;
    assert_eq!(stats.metrics.successful_requests, 1);
    assert_eq!(stats.metrics.failed_requests, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn upstream_5xx_completes_task_but_counts_as_failure() {
    // 5xx policy: the response is delivered as-is, yet breaker and metrics
    // treat it as an upstream failure.
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 1, max_concurrent: 1, ..EngineConfig::default() },
        ..ServiceConfig::default()
    };
    let service =
        service_with(config, Arc::new(RealClock), Arc::new(StatusForwarder::new(500)));
    service.start().await;

    let id = submit_simple(&service, "/api/run").await;
    let view = wait_terminal(&service, id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result.unwrap().status, 500);

    let stats = service.stats().await;
    assert_eq!(stats.metrics.failed_requests, 1);
    assert_eq!(stats.circuit.consecutive_failures, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn breaker_short_circuits_after_threshold_without_upstream_call() {
    // Scenario: always-500 upstream, threshold 5. The sixth task must fail
    // through the breaker with no sixth network call.
    let forwarder = Arc::new(StatusForwarder::new(500));
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 1, max_concurrent: 1, ..EngineConfig::default() },
        circuit: CircuitConfig { failure_threshold: 5, cooldown: Duration::from_secs(600) },
        ..ServiceConfig::default()
    };
    let service = service_with(config, Arc::new(RealClock), Arc::clone(&forwarder) as _);
    service.start().await;

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(submit_simple(&service, &format!("/api/run/{i}")).await);
    }

    let mut views = Vec::new();
    for id in &ids {
        views.push(wait_terminal(&service, *id).await);
    }

    // First five reached the upstream and completed with the 500 payload.
    for view in &views[..5] {
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.result.as_ref().unwrap().status, 500);
    }

    // The sixth was rejected by the breaker before any network attempt.
    let rejected = &views[5];
    assert_eq!(rejected.status, TaskStatus::Failed);
    let error = rejected.error.as_deref().unwrap_or_default();
    assert!(error.contains("circuit breaker"), "error should identify the breaker: {error}");
    assert_eq!(forwarder.calls.load(Ordering::SeqCst), 5);

    let stats = service.stats().await;
    assert!(stats.circuit.is_open);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn upstream_timeout_fails_task_with_timeout_flag() {
    // Scenario: upstream sleeps 400ms with a 150ms read timeout.
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
        .mount(&server)
        .await;

    let config = ServiceConfig {
        engine: EngineConfig {
            num_workers: 1,
            max_concurrent: 1,
            target_base_url: server.uri(),
            ..EngineConfig::default()
        },
        client: ClientConfig {
            read_timeout: Duration::from_millis(150),
            max_retries: 0,
            ..ClientConfig::default()
        },
        ..ServiceConfig::default()
    };
    let service = TaskService::new(config, Arc::new(RealClock)).unwrap();
    service.start().await;

    let id = submit_simple(&service, "/api/slow").await;
    let view = wait_terminal(&service, id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    let error = view.error.as_deref().unwrap_or_default();
    assert!(error.contains("timed out"), "error should describe the timeout: {error}");
    // 400ms is nowhere near the 300s long-task threshold.
    assert!(!view.is_long_task);

    let stats = service.stats().await;
    assert_eq!(stats.metrics.timeout_requests, 1);
    assert_eq!(stats.metrics.failed_requests, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn forwarding_beyond_threshold_flags_long_task() {
    // Scenario: the upstream call takes 310 virtual seconds against the
    // default 300s threshold, driven by an injected test clock.
    let clock = TestClock::new();
    let forwarder = Arc::new(ClockAdvancingForwarder {
        clock: clock.clone(),
        advance: Duration::from_secs(310),
    });
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 1, max_concurrent: 1, ..EngineConfig::default() },
        ..ServiceConfig::default()
    };
    let service = service_with(config, Arc::new(clock), forwarder);
    service.start().await;

    let id = submit_simple(&service, "/api/batch").await;
    let view = wait_terminal(&service, id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert!(view.is_long_task);

    let stats = service.stats().await;
    assert_eq!(stats.tasks.long_tasks, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrency_never_exceeds_limiter_ceiling() {
    let forwarder = Arc::new(SlowForwarder::new(Duration::from_millis(40)));
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 8, max_concurrent: 2, ..EngineConfig::default() },
        ..ServiceConfig::default()
    };
    let service = service_with(config, Arc::new(RealClock), Arc::clone(&forwarder) as _);
    service.start().await;

    let mut ids = Vec::new();
    for i in 0..12 {
        ids.push(submit_simple(&service, &format!("/api/run/{i}")).await);
    }
    for id in ids {
        wait_terminal(&service, id).await;
    }

    assert!(
        forwarder.max_seen.load(Ordering::SeqCst) <= 2,
        "at no instant may more than max_concurrent calls be in flight"
    );

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn tasks_are_picked_up_in_submission_order() {
    let forwarder = Arc::new(RecordingForwarder::new());
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 1, max_concurrent: 1, ..EngineConfig::default() },
        ..ServiceConfig::default()
    };
    let service = service_with(config, Arc::new(RealClock), Arc::clone(&forwarder) as _);

    // Queue everything before starting so pickup order is pure FIFO.
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(submit_simple(&service, &format!("/api/run/{i}")).await);
    }
    service.start().await;
    for id in &ids {
        wait_terminal(&service, *id).await;
    }

    assert_eq!(*forwarder.seen.lock().unwrap(), ids);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_tasks() {
    let clock = TestClock::new();
    let service = service_with(
        ServiceConfig {
            engine: EngineConfig { num_workers: 1, max_concurrent: 1, ..EngineConfig::default() },
            ..ServiceConfig::default()
        },
        Arc::new(clock.clone()),
        Arc::new(StatusForwarder::new(200)),
    );
    service.start().await;

    let old = submit_simple(&service, "/api/old").await;
    wait_terminal(&service, old).await;

    clock.advance(Duration::from_secs(25 * 3600));

    let fresh = submit_simple(&service, "/api/fresh").await;
    wait_terminal(&service, fresh).await;
    let still_pending = {
        // Stop workers first so this one stays pending forever.
        service.shutdown().await.unwrap();
        submit_simple(&service, "/api/pending").await
    };

    clock.advance(Duration::from_secs(25 * 3600));

    // Both terminal tasks are now older than 24h; the pending one is too,
    // but pending tasks are never removed.
    let removed = service.cleanup(Duration::from_secs(24 * 3600)).await;
    assert_eq!(removed, 2);
    assert!(service.query(old).await.is_none());
    assert!(service.query(fresh).await.is_none());
    assert_eq!(service.query(still_pending).await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn stats_reflect_pool_and_limiter_state() {
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 3, max_concurrent: 7, ..EngineConfig::default() },
        queue_capacity: 11,
        ..ServiceConfig::default()
    };
    let service =
        service_with(config, Arc::new(RealClock), Arc::new(StatusForwarder::new(200)));

    let stats = service.stats().await;
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.queue_capacity, 11);

    service.start().await;
    let stats = service.stats().await;
    assert_eq!(stats.active_workers, 3);
    assert_eq!(stats.available_slots, 7);
    assert_eq!(stats.in_flight, 0);
    assert!(!stats.circuit.is_open);

    service.shutdown().await.unwrap();
    let stats = service.stats().await;
    assert_eq!(stats.active_workers, 0);
}

#[tokio::test]
async fn status_sequence_never_regresses() {
    // Sample the status of one task through its lifetime and check the
    // observations form a subsequence of pending -> processing -> terminal.
    let forwarder = Arc::new(SlowForwarder::new(Duration::from_millis(50)));
    let config = ServiceConfig {
        engine: EngineConfig { num_workers: 1, max_concurrent: 1, ..EngineConfig::default() },
        ..ServiceConfig::default()
    };
    let service = service_with(config, Arc::new(RealClock), forwarder);
    service.start().await;

    let id = submit_simple(&service, "/api/run").await;

    let rank = |status: TaskStatus| match status {
        TaskStatus::Pending => 0,
        TaskStatus::Processing => 1,
        TaskStatus::Completed | TaskStatus::Failed => 2,
    };

    let mut last_rank = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let view = service.query(id).await.expect("task should exist");
        let current = rank(view.status);
        assert!(current >= last_rank, "status regressed from rank {last_rank} to {current}");
        last_rank = current;
        if view.status.is_terminal() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never terminated");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    service.shutdown().await.unwrap();
}
