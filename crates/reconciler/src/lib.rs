//! # Meridian Reconciler Crate
//!
//! Ledger-vs-venue reconciliation: resolves parked `unknown` orders,
//! forces verdicts on stale pending positions, and repairs balance drift
//! on open positions.
//!
//! ## Architectural Principles
//!
//! - **Venue Truth Wins:** whenever the ledger and the venue disagree
//!   about a held quantity, the venue is authoritative. The ledger records
//!   intent; balances record reality.
//! - **Repairs Are Auditable:** every change reconciliation makes goes
//!   through the position state machine and leaves a `Correction` row.
//!   Nothing is silently patched.
//! - **Ambiguity Escalates, Never Resolves Itself:** an outcome the venue
//!   cannot report past the timeout becomes an `Anomaly` for an operator.
//!   Anomalies are cleared only by an operator or by a later pass that
//!   genuinely resolves the underlying order.

pub mod error;
pub mod reconciler;

// Re-export the key components to provide a clean, public-facing API.
pub use error::ReconcileError;
pub use reconciler::{ReconcileScope, Reconciler};
