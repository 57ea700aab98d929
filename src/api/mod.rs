//! HTTP API module for the cronlet controller.
//!
//! Provides REST endpoints for managing CronJobs, reporting job status, and
//! controlling the controller.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::controller::ControllerHandle;
use crate::core::clock::{Clock, SystemClock};
use crate::store::ObjectStore;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address {}:{}: {}", self.host, self.port, e),
            )
        })
    }
}

/// Build the API router with all endpoints.
pub fn build_router<S: ObjectStore + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Controller control
        .route(
            "/api/controller/state",
            get(handlers::get_controller_state::<S>),
        )
        .route(
            "/api/controller/pause",
            post(handlers::pause_controller::<S>),
        )
        .route(
            "/api/controller/resume",
            post(handlers::resume_controller::<S>),
        )
        // CronJobs
        .route("/api/cronjobs", get(handlers::list_cronjobs::<S>))
        .route(
            "/api/namespaces/{namespace}/cronjobs/{name}",
            get(handlers::get_cronjob::<S>)
                .put(handlers::put_cronjob::<S>)
                .delete(handlers::delete_cronjob::<S>),
        )
        .route(
            "/api/namespaces/{namespace}/cronjobs/{name}/jobs",
            get(handlers::list_cronjob_jobs::<S>),
        )
        .route(
            "/api/namespaces/{namespace}/cronjobs/{name}/reconcile",
            post(handlers::reconcile_cronjob::<S>),
        )
        // Jobs
        .route(
            "/api/namespaces/{namespace}/jobs/{name}/status",
            put(handlers::put_job_status::<S>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state using wall-clock time.
pub fn create_api_state<S: ObjectStore>(handle: ControllerHandle, store: Arc<S>) -> ApiState<S> {
    ApiState {
        handle,
        store,
        clock: Arc::new(SystemClock),
    }
}

/// Create the API state with an explicit clock for next-firing reports.
pub fn create_api_state_with_clock<S: ObjectStore>(
    handle: ControllerHandle,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
) -> ApiState<S> {
    ApiState {
        handle,
        store,
        clock,
    }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: ObjectStore + 'static>(
    config: ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config.socket_addr()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
