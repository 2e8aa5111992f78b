use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use engine::EngineError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Engine(EngineError::CycleBusy) => (
                StatusCode::CONFLICT,
                "A cycle is already in progress".to_string(),
            ),
            AppError::Engine(engine_err) => {
                tracing::error!(error = ?engine_err, "Engine error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal engine error occurred".to_string(),
                )
            }
            AppError::Ledger(ledger_err) => {
                tracing::error!(error = ?ledger_err, "Ledger error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal ledger error occurred".to_string(),
                )
            }
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
