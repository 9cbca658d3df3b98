//! HTTP server assembly and lifecycle.
//!
//! Builds the axum router with its middleware stack (request ids, tracing,
//! inbound timeout) and serves it with graceful shutdown on SIGINT/SIGTERM.

use std::net::SocketAddr;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, AppState};

/// Assembles the router with all routes and middleware.
///
/// The static control routes (`/api/task/create`, `/api/task/{id}/result`)
/// are registered alongside the forwarding catch-all; the router prefers
/// the static matches, so control traffic is never forwarded upstream.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    Router::new()
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::liveness))
        .route("/stats", get(handlers::stats))
        .route("/proxy-metrics", get(handlers::stats))
        .route("/proxy-health", get(handlers::stats))
        .route("/task/{task_id}", get(handlers::task_status))
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/cleanup", delete(handlers::cleanup_tasks))
        .route("/api/task/create", post(handlers::create_task))
        .route("/api/task/{task_id}/result", get(handlers::task_result))
        .route("/api/{*path}", post(handlers::forward_api))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware adding an `X-Request-Id` header to every response.
async fn inject_request_id(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut request = request;
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

/// Binds the listener and serves until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an I/O error when the port is taken or the interface is
/// unavailable.
pub async fn start_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Resolves on CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
