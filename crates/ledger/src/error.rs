use thiserror::Error;

/// Ledger failures are engine-wide: the process must not continue issuing
/// orders without a durable ledger, so callers treat these as fatal for the
/// current cycle and rely on restart-time replay.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),

    #[error("The requested record was not found in the ledger.")]
    NotFound,
}
