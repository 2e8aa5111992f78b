//! # Meridian Execution Crate
//!
//! The order execution pipeline: routes an `Adjustment` into venue orders,
//! submits them with idempotent retries, and settles the confirmed fills
//! back into the position state machine.
//!
//! ## Architectural Principles
//!
//! - **Write-Ahead Everything:** the order row and the pending position
//!   transition hit the ledger before the first submission attempt. A crash
//!   at any point leaves a durable record the reconciler can resolve.
//! - **Ambiguity Is a State, Not an Error:** a submission whose outcome
//!   cannot be confirmed parks the order in `unknown` status. The pipeline
//!   never guesses whether an unconfirmed order executed.
//! - **Idempotent Retries:** transient venue failures are retried with
//!   exponential backoff and the original idempotency key, so a venue that
//!   honors the key can never double-execute.
//!
//! ## Public API
//!
//! - `ExecutionPipeline`: the per-adjustment driver.
//! - `OrderRouter` / `DirectRouter`: adjustment-to-orders decomposition.
//! - `ExecutionReport` / `ExecutionOutcome`: what the cycle classifier
//!   consumes.

pub mod error;
pub mod pipeline;
pub mod router;

// Re-export the key components to provide a clean, public-facing API.
pub use error::ExecutionError;
pub use pipeline::{ExecutionOutcome, ExecutionPipeline, ExecutionReport};
pub use router::{DirectRouter, OrderLeg, OrderRouter};
