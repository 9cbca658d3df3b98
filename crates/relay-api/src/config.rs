//! Service configuration.
//!
//! Configuration is loaded in priority order: environment variables over
//! `config.toml` over built-in defaults. The service works out of the box
//! against a local upstream; deployments override the target and tuning
//! knobs per environment. All values are startup-only; nothing here is
//! runtime-mutable.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use relay_delivery::{CircuitConfig, ClientConfig, EngineConfig, ServiceConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Complete relay configuration with defaults, file, and env overrides.
///
/// # Example
///
/// ```no_run
/// use relay_api::Config;
///
/// let config = Config::load().expect("failed to load configuration");
/// println!("forwarding to {}", config.target_base_url());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Target upstream
    /// Host of the upstream the service forwards to.
    ///
    /// Environment variable: `TARGET_HOST`
    #[serde(default = "default_target_host", alias = "TARGET_HOST")]
    pub target_host: String,
    /// Port of the upstream.
    ///
    /// Environment variable: `TARGET_PORT`
    #[serde(default = "default_target_port", alias = "TARGET_PORT")]
    pub target_port: u16,

    // Listener
    /// Bind address for the HTTP surface.
    ///
    /// Environment variable: `LISTEN_HOST`
    #[serde(default = "default_listen_host", alias = "LISTEN_HOST")]
    pub listen_host: String,
    /// Bind port for the HTTP surface.
    ///
    /// Environment variable: `LISTEN_PORT`
    #[serde(default = "default_listen_port", alias = "LISTEN_PORT")]
    pub listen_port: u16,
    /// Inbound request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT_SECONDS")]
    pub request_timeout_seconds: u64,

    // Concurrency
    /// Ceiling on simultaneously in-flight upstream calls.
    ///
    /// Environment variable: `MAX_CONCURRENT`
    #[serde(default = "default_max_concurrent", alias = "MAX_CONCURRENT")]
    pub max_concurrent: usize,
    /// Admission queue capacity.
    ///
    /// Environment variable: `MAX_QUEUE_SIZE`
    #[serde(default = "default_max_queue_size", alias = "MAX_QUEUE_SIZE")]
    pub max_queue_size: usize,
    /// Number of worker pulling loops.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[serde(default = "default_num_workers", alias = "NUM_WORKERS")]
    pub num_workers: usize,

    // Timeouts
    /// Upstream TCP connect timeout in seconds.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout", alias = "CONNECT_TIMEOUT_SECONDS")]
    pub connect_timeout_seconds: u64,
    /// Upstream read timeout in seconds.
    ///
    /// Environment variable: `READ_TIMEOUT_SECONDS`
    #[serde(default = "default_read_timeout", alias = "READ_TIMEOUT_SECONDS")]
    pub read_timeout_seconds: u64,

    // Connection pool
    /// Connection pools kept by the upstream client.
    ///
    /// Environment variable: `POOL_CONNECTIONS`
    #[serde(default = "default_pool_connections", alias = "POOL_CONNECTIONS")]
    pub pool_connections: usize,
    /// Maximum pooled connections to the upstream host.
    ///
    /// Environment variable: `POOL_MAXSIZE`
    #[serde(default = "default_pool_maxsize", alias = "POOL_MAXSIZE")]
    pub pool_maxsize: usize,

    // Retries
    /// Extra forwarding attempts for retryable failures.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[serde(default = "default_max_retries", alias = "MAX_RETRIES")]
    pub max_retries: u32,
    /// Base of the exponential retry backoff, in seconds.
    ///
    /// Environment variable: `RETRY_BACKOFF_FACTOR`
    #[serde(default = "default_backoff_factor", alias = "RETRY_BACKOFF_FACTOR")]
    pub retry_backoff_factor: f64,

    // Circuit breaker
    /// Consecutive failures that open the breaker.
    ///
    /// Environment variable: `CIRCUIT_BREAKER_THRESHOLD`
    #[serde(default = "default_breaker_threshold", alias = "CIRCUIT_BREAKER_THRESHOLD")]
    pub circuit_breaker_threshold: u32,
    /// Seconds the breaker stays open before a trial call.
    ///
    /// Environment variable: `CIRCUIT_BREAKER_TIMEOUT_SECONDS`
    #[serde(default = "default_breaker_timeout", alias = "CIRCUIT_BREAKER_TIMEOUT_SECONDS")]
    pub circuit_breaker_timeout_seconds: u64,

    // Long tasks
    /// Forwarding calls longer than this are flagged as long tasks.
    ///
    /// Environment variable: `LONG_TASK_THRESHOLD_SECONDS`
    #[serde(default = "default_long_task_threshold", alias = "LONG_TASK_THRESHOLD_SECONDS")]
    pub long_task_threshold_seconds: u64,

    // Logging
    /// Log filter, `RUST_LOG` syntax.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_filter", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `config.toml`, and environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a source fails to parse or validation fails.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Base URL of the forwarding target.
    pub fn target_base_url(&self) -> String {
        format!("http://{}:{}", self.target_host, self.target_port)
    }

    /// Parses the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error when host and port do not form a socket address.
    pub fn parse_listen_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.listen_host, self.listen_port);
        SocketAddr::from_str(&addr).context("invalid listen address")
    }

    /// Inbound request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Converts into the delivery crate's service configuration.
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            queue_capacity: self.max_queue_size,
            engine: self.to_engine_config(),
            client: self.to_client_config(),
            circuit: self.to_circuit_config(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Converts into engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            num_workers: self.num_workers,
            max_concurrent: self.max_concurrent,
            long_task_threshold: Duration::from_secs(self.long_task_threshold_seconds),
            target_base_url: self.target_base_url(),
        }
    }

    /// Converts into upstream client configuration.
    ///
    /// The upstream client keeps one pool per host; with a single
    /// forwarding target, `pool_maxsize` is the binding limit and
    /// `pool_connections` is echoed for observability.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            read_timeout: Duration::from_secs(self.read_timeout_seconds),
            pool_max_idle_per_host: self.pool_maxsize,
            max_retries: self.max_retries,
            retry_backoff_factor: self.retry_backoff_factor,
            user_agent: format!("relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Converts into circuit breaker configuration.
    pub fn to_circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_breaker_threshold,
            cooldown: Duration::from_secs(self.circuit_breaker_timeout_seconds),
        }
    }

    /// Validates configured values.
    fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            anyhow::bail!("listen_port must be greater than 0");
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than 0");
        }
        if self.max_queue_size == 0 {
            anyhow::bail!("max_queue_size must be greater than 0");
        }
        if self.num_workers == 0 {
            anyhow::bail!("num_workers must be greater than 0");
        }
        if self.retry_backoff_factor < 0.0 {
            anyhow::bail!("retry_backoff_factor must not be negative");
        }
        if self.circuit_breaker_threshold == 0 {
            anyhow::bail!("circuit_breaker_threshold must be greater than 0");
        }
        if self.pool_maxsize == 0 || self.pool_connections == 0 {
            anyhow::bail!("connection pool sizes must be greater than 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_host: default_target_host(),
            target_port: default_target_port(),
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            request_timeout_seconds: default_request_timeout(),
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            num_workers: default_num_workers(),
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            pool_connections: default_pool_connections(),
            pool_maxsize: default_pool_maxsize(),
            max_retries: default_max_retries(),
            retry_backoff_factor: default_backoff_factor(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_timeout_seconds: default_breaker_timeout(),
            long_task_threshold_seconds: default_long_task_threshold(),
            rust_log: default_log_filter(),
        }
    }
}

fn default_target_host() -> String {
    "127.0.0.1".to_string()
}

fn default_target_port() -> u16 {
    8000
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_queue_size() -> usize {
    100
}

fn default_num_workers() -> usize {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    120
}

fn default_pool_connections() -> usize {
    20
}

fn default_pool_maxsize() -> usize {
    50
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_factor() -> f64 {
    0.5
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    60
}

fn default_long_task_threshold() -> u64 {
    300
}

fn default_log_filter() -> String {
    "info".to_string()
}
