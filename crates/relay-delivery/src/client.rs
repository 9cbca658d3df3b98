//! Pooled HTTP client for upstream forwarding.
//!
//! One [`HttpForwarder`] is shared by every worker; it reuses a bounded
//! `reqwest` connection pool instead of dialing per request. Transient
//! failure classes (connection errors, 5xx, 429) are retried internally
//! with capped exponential backoff, so callers only ever see the final
//! attempt's classification plus the total elapsed duration. A received
//! response of any status is an outcome; only unreachable upstreams and
//! timeouts surface as errors.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use bytes::Bytes;
use relay_core::{Clock, TaskId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ForwardError, Result};

/// Ceiling on a single retry backoff delay.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Stored response bodies are truncated past this size.
const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024;

/// Configuration for the forwarding client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Deadline for receiving the response.
    pub read_timeout: Duration,
    /// Idle connections retained per upstream host.
    pub pool_max_idle_per_host: usize,
    /// Extra attempts after the initial one for retryable failures.
    pub max_retries: u32,
    /// Base of the exponential backoff between retries, in seconds.
    pub retry_backoff_factor: f64,
    /// User agent sent on forwarded requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            pool_max_idle_per_host: 50,
            max_retries: 2,
            retry_backoff_factor: 0.5,
            user_agent: concat!("relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One forwarding call to the upstream.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Task this call belongs to, for log correlation.
    pub task_id: TaskId,
    /// HTTP method.
    pub method: String,
    /// Fully-qualified target URL.
    pub url: String,
    /// Request headers, managed entries already stripped at ingestion.
    pub headers: HashMap<String, String>,
    /// Opaque request body.
    pub body: Bytes,
}

/// Final classification of a forwarding call that reached the upstream.
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    /// HTTP status the upstream returned.
    pub status: u16,
    /// Response headers, minus hop-by-hop entries.
    pub headers: HashMap<String, String>,
    /// Response body text, truncated past 64 KiB.
    pub body: String,
    /// Total elapsed time including internal retries.
    pub duration: Duration,
    /// Transport-level success: status in `[200, 500)`.
    ///
    /// 5xx counts as failure even though a response was received; the
    /// service exists to isolate flaky upstreams.
    pub success: bool,
    /// Whether the attempt ended in a timeout (always false here; timeouts
    /// surface as [`ForwardError::Timeout`]). Kept so stub forwarders can
    /// exercise the flag.
    pub is_timeout: bool,
}

/// Upstream call seam.
///
/// Production uses [`HttpForwarder`]; tests inject counting, failing, or
/// clock-advancing doubles.
pub trait Forwarder: Send + Sync + 'static {
    /// Performs one forwarding call, retries included.
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForwardOutcome>> + Send + '_>>;
}

/// `reqwest`-backed forwarder with connection pooling.
#[derive(Debug)]
pub struct HttpForwarder {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl HttpForwarder {
    /// Builds the pooled client.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Configuration`] if the underlying HTTP
    /// client rejects the settings.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            // Redirects pass through as responses; the proxy does not chase them.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ForwardError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, clock })
    }

    async fn forward_with_retries(&self, request: ForwardRequest) -> Result<ForwardOutcome> {
        let started = self.clock.now();
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ForwardError::configuration(format!("invalid method: {}", request.method)))?;

        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&method, &request).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_retryable_status(status) && attempt < self.config.max_retries {
                        attempt += 1;
                        let delay = self.backoff_delay(attempt);
                        debug!(
                            task_id = %request.task_id,
                            status,
                            attempt,
                            delay_ms = delay.as_millis(),
                            "retryable upstream status, backing off"
                        );
                        self.clock.sleep(delay).await;
                        continue;
                    }
                    return self.into_outcome(response, started).await;
                },
                Err(e) if e.is_timeout() => {
                    warn!(task_id = %request.task_id, "upstream request timed out");
                    return Err(ForwardError::timeout(self.config.read_timeout.as_secs()));
                },
                Err(e) if e.is_connect() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        task_id = %request.task_id,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "connection failed, backing off"
                    );
                    self.clock.sleep(delay).await;
                },
                Err(e) if e.is_connect() => {
                    return Err(ForwardError::unreachable(format!("connection failed: {e}")));
                },
                Err(e) => return Err(ForwardError::unreachable(e.to_string())),
            }
        }
    }

    async fn send_once(
        &self,
        method: &reqwest::Method,
        request: &ForwardRequest,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut builder =
            self.client.request(method.clone(), &request.url).body(request.body.clone());

        for (name, value) in &request.headers {
            if !is_managed_header(name) {
                builder = builder.header(name, value);
            }
        }

        builder.send().await
    }

    async fn into_outcome(
        &self,
        response: reqwest::Response,
        started: std::time::Instant,
    ) -> Result<ForwardOutcome> {
        let status = response.status().as_u16();
        let headers = filtered_response_headers(response.headers());

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_BYTES => {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_BYTES]);
                format!("{truncated}... (truncated)")
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(status, "failed to read upstream response body: {e}");
                format!("[failed to read response body: {e}]")
            },
        };

        let duration = self.clock.now().duration_since(started);
        Ok(ForwardOutcome {
            status,
            headers,
            body,
            duration,
            success: (200..500).contains(&status),
            is_timeout: false,
        })
    }

    /// Exponential backoff before retry `attempt` (1-based), capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let secs = self.config.retry_backoff_factor * 2_f64.powi(exponent as i32);
        Duration::from_secs_f64(secs.max(0.0)).min(MAX_RETRY_BACKOFF)
    }
}

impl Forwarder for HttpForwarder {
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForwardOutcome>> + Send + '_>> {
        Box::pin(self.forward_with_retries(request))
    }
}

/// Status codes the client retries: rate limiting and server errors.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Request headers owned by the forwarding layer.
///
/// The ingestion strip set plus the hop-by-hop headers a proxy must
/// never relay.
fn is_managed_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "host"
            | "connection"
            | "accept-encoding"
            | "content-length"
            | "user-agent"
            | "keep-alive"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "upgrade"
            | "proxy-authenticate"
            | "proxy-authorization"
    )
}

/// Response headers that do not survive proxying.
fn filtered_response_headers(header_map: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (name, value) in header_map {
        let lowered = name.as_str().to_ascii_lowercase();
        if matches!(lowered.as_str(), "connection" | "transfer-encoding" | "content-encoding") {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    headers
}
