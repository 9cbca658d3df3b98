//! Relay: concurrency-bounded HTTP forwarding service.
//!
//! Accepts requests on the listen port, queues them as addressable tasks,
//! and delivers them asynchronously to the configured upstream through a
//! bounded worker pool with circuit breaking and retry/backoff. Callers
//! poll task state by id.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_api::{start_server, AppState, Config};
use relay_core::RealClock;
use relay_delivery::TaskService;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!(
        target = %config.target_base_url(),
        listen = %format!("{}:{}", config.listen_host, config.listen_port),
        max_concurrent = config.max_concurrent,
        max_queue_size = config.max_queue_size,
        num_workers = config.num_workers,
        read_timeout_secs = config.read_timeout_seconds,
        circuit_breaker_threshold = config.circuit_breaker_threshold,
        "relay starting"
    );

    let clock = Arc::new(RealClock);
    let service = Arc::new(
        TaskService::new(config.to_service_config(), clock.clone())
            .context("failed to build task service")?,
    );
    service.start().await;

    let addr = config.parse_listen_addr()?;
    let state = AppState { service: Arc::clone(&service), config: Arc::new(config), clock };

    // Serves until SIGINT/SIGTERM, then drains in-flight work.
    start_server(state, addr).await.context("HTTP server failed")?;

    if let Err(e) = service.shutdown().await {
        error!(error = %e, "worker shutdown incomplete");
    }

    info!("relay shutdown complete");
    Ok(())
}

/// Initializes structured logging from `RUST_LOG` or the configured filter.
fn init_tracing(fallback_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
}
