use thiserror::Error;

/// Errors from the reconciliation pass itself.
///
/// A discrepancy is never an error: discrepancies are the reconciler's
/// input, resolved into `Correction`s. An error here means the pass could
/// not complete (ledger unavailable, venue balance query failed).
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Venue error: {0}")]
    Venue(#[from] venue::VenueError),

    #[error("Position error: {0}")]
    Position(#[from] positions::PositionError),

    #[error("Core error: {0}")]
    Core(#[from] core_types::CoreError),
}
