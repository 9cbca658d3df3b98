//! Relay HTTP API.
//!
//! Axum surface over the task service: request submission, status polling,
//! task listing, cleanup, and stats reporting.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use relay_core::Clock;
use relay_delivery::TaskService;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The forwarding service façade.
    pub service: Arc<TaskService>,
    /// Startup configuration, echoed by the stats endpoint.
    pub config: Arc<Config>,
    /// Clock used for response timestamps.
    pub clock: Arc<dyn Clock>,
}
