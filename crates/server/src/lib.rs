//! # Meridian Server Crate
//!
//! The control API: a small axum surface for triggering cycles, checking
//! status and health, and inspecting positions and anomalies. It is an
//! operator door into the engine, deliberately separate from any
//! trade-data plumbing.

use axum::{
    Router,
    routing::{get, post},
};
use engine::{SchedulerHandle, SharedRunState};
use ledger::LedgerStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

pub use error::AppError;

/// The shared application state that all handlers can access.
pub struct AppState {
    pub scheduler: SchedulerHandle,
    pub ledger: Arc<dyn LedgerStore>,
    pub run_state: SharedRunState,
}

/// Builds the application router. Split out from `run_server` so tests can
/// drive it without binding a socket.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any());

    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .route("/cycle/trigger", post(handlers::trigger_cycle))
        .route("/cycle/status", get(handlers::cycle_status))
        .route("/positions", get(handlers::positions))
        .route("/anomalies", get(handlers::anomalies))
        .with_state(state)
        .layer(cors)
        // This middleware will automatically log information about every
        // incoming request.
        .layer(TraceLayer::new_for_http())
}

/// The main function to configure and run the control API.
pub async fn run_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);
    tracing::info!("Control API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
