//! # Meridian Engine Crate
//!
//! The cycle scheduler: the orchestrator that turns a decision function's
//! target allocation into reconciled, audited venue state, one exclusive
//! cycle at a time.
//!
//! ## Architectural Principles
//!
//! - **One Cycle at a Time, Everywhere:** an in-process flag serializes
//!   cycles inside the instance, and a durable ledger lease serializes
//!   them across instances sharing a ledger. Losing the lease skips the
//!   slot rather than waiting on it.
//! - **Reconcile Before You Decide:** every cycle starts by bringing the
//!   ledger in line with venue truth, so the decision function never
//!   plans on top of stale or unconfirmed state.
//! - **Fail Closed:** a failing decision function seals the cycle as a
//!   failure with zero orders issued. Wrong and idle beats wrong and
//!   trading.
//!
//! ## Public API
//!
//! - `CycleScheduler` / `SchedulerHandle`: the loop and its control handle.
//! - `DecisionFunction`: the pluggable strategy seam, with `HoldDecision`
//!   and `FixedDecision` built in.
//! - `PriceSource`: per-cycle mark-price snapshots.
//! - `RunState`: the instance condition served by the control API.

pub mod decision;
pub mod error;
pub mod prices;
pub mod run_state;
pub mod scheduler;

// Re-export the key components to provide a clean, public-facing API.
pub use decision::{DecisionError, DecisionFunction, FixedDecision, HoldDecision};
pub use error::EngineError;
pub use prices::{FixedPriceSource, PriceError, PriceSource};
pub use run_state::{RunState, SharedRunState, shared_run_state};
pub use scheduler::{CycleScheduler, SchedulerHandle};
