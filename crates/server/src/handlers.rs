use crate::{AppState, error::AppError};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use core_types::{Anomaly, CycleRecord, Position};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// # GET /ping
/// The liveness probe. Always answers while the process is up.
pub async fn ping() -> impl IntoResponse {
    Json(json!({ "ping": "pong" }))
}

/// # GET /health
/// Readiness: 200 while the scheduler runs cleanly, 503 otherwise.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let run_state = state.run_state.read().await.clone();
    let status = if run_state.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(run_state))
}

/// # POST /cycle/trigger
/// Requests an out-of-band cycle. 202 when accepted (or queued), 409 when
/// the busy policy rejects it.
pub async fn trigger_cycle(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.scheduler.trigger()?;
    tracing::info!("manual cycle trigger accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

#[derive(Debug, Serialize)]
pub struct CycleStatus {
    pub in_progress: bool,
    pub last_cycle: Option<CycleRecord>,
    pub run_state: engine::RunState,
    pub open_anomalies: Vec<Anomaly>,
}

/// # GET /cycle/status
/// The most recent cycle record, the scheduler's run state and every
/// anomaly awaiting an operator, in one operator-facing snapshot.
pub async fn cycle_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleStatus>, AppError> {
    let last_cycle = state.ledger.last_cycle().await?;
    let open_anomalies = state.ledger.open_anomalies().await?;
    let run_state = state.run_state.read().await.clone();
    Ok(Json(CycleStatus {
        in_progress: state.scheduler.is_busy(),
        last_cycle,
        run_state,
        open_anomalies,
    }))
}

/// # GET /positions
/// Every live (non-closed) position in the ledger.
pub async fn positions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Position>>, AppError> {
    Ok(Json(state.ledger.live_positions().await?))
}

/// # GET /anomalies
/// Open anomalies awaiting an operator.
pub async fn anomalies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Anomaly>>, AppError> {
    Ok(Json(state.ledger.open_anomalies().await?))
}
