//! # Meridian Positions Crate
//!
//! The position state machine: every status transition a `Position` can
//! legally make lives here, together with the `PositionBook` that holds the
//! live positions of one engine instance during a cycle.
//!
//! ## Architectural Principles
//!
//! - **State vs. Logic Decoupling:** This is a pure logic crate. It never
//!   touches the ledger or a venue; callers persist the transitions it
//!   computes. That separation is what makes the lifecycle testable without
//!   any I/O.
//! - **Invariants as Code:** "quantity is non-zero iff the position is not
//!   closed" and "one live position per instrument" are checked on every
//!   transition and on book load, not assumed.
//! - **Accounted Quantity:** a position's quantity is what the engine has
//!   committed to, so a `pending_open` position carries its intended
//!   quantity until the fill confirms the real one. Reconciliation treats
//!   pending positions through order resolution, not balance comparison.
//!
//! ## Public API
//!
//! - `lifecycle`: the transition functions (`create_pending_open`,
//!   `confirm_open`, `begin_close`, `confirm_close`, ...).
//! - `PositionBook`: per-cycle view with target diffing and risk triggers.
//! - `PositionError`: the specific error types for illegal transitions.

pub mod book;
pub mod error;
pub mod lifecycle;

// Re-export the key components to provide a clean, public-facing API.
pub use book::PositionBook;
pub use error::PositionError;
