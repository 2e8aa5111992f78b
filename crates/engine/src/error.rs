use crate::decision::DecisionError;
use crate::prices::PriceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A cycle is already in progress")]
    CycleBusy,

    #[error("The scheduler is not running")]
    SchedulerStopped,

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Venue error: {0}")]
    Venue(#[from] venue::VenueError),

    #[error("Execution error: {0}")]
    Execution(#[from] execution::ExecutionError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] reconciler::ReconcileError),

    #[error("Position error: {0}")]
    Position(#[from] positions::PositionError),

    #[error("Decision function error: {0}")]
    Decision(#[from] DecisionError),

    #[error("Price source error: {0}")]
    Price(#[from] PriceError),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("Serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}
