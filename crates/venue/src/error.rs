use thiserror::Error;

/// The venue error taxonomy drives the execution pipeline's behavior:
/// transient errors are retried with backoff, rejections are terminal for
/// the order, and confirmation timeouts leave the order `unknown` for the
/// reconciler to resolve, never assumed filled or lost.
#[derive(Error, Debug)]
pub enum VenueError {
    #[error("Transient venue error: {0}")]
    Transient(String),

    #[error("Order rejected by venue: {0}")]
    Rejected(String),

    #[error("Order submission outcome could not be confirmed in time")]
    ConfirmationTimeout,

    #[error("Venue protocol error: {0}")]
    Protocol(String),
}

impl VenueError {
    /// True for errors worth retrying with the same idempotency key.
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Transient(_))
    }
}
