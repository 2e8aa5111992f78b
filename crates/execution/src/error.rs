use thiserror::Error;

/// Errors from the order execution pipeline.
///
/// Note that a rejected or unconfirmed order is NOT an error: those are
/// normal outcomes, reported through `ExecutionOutcome`. An `ExecutionError`
/// means the pipeline itself could not proceed (persistence failed, the
/// adjustment was malformed, the position is mid-flight).
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Position error: {0}")]
    Position(#[from] positions::PositionError),

    #[error("Core error: {0}")]
    Core(#[from] core_types::CoreError),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Adjustment for '{0}' carries no reference price")]
    MissingReferencePrice(String),

    #[error("Position for '{0}' is awaiting confirmation; adjustment deferred")]
    PositionPending(String),
}
