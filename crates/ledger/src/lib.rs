//! # Meridian Ledger Crate
//!
//! This crate is the engine's single source of durable truth: positions,
//! orders, cycle records, corrections, anomalies and the cycle lease all
//! live behind the `LedgerStore` trait defined here.
//!
//! ## Architectural Principles
//!
//! - **Write-Ahead Discipline:** Callers persist every state transition
//!   through this crate before considering it complete. A crash after a
//!   write but before the caller returns never loses state; recovery is
//!   "replay the last incomplete cycle through the reconciler".
//! - **Single Shared Resource:** All components serialize through the
//!   ledger rather than sharing in-memory state. The scheduler owns cycle
//!   records, the execution pipeline owns order mutation, and the position
//!   state machine owns status transitions, but all of them write here.
//! - **Swappable Backend:** `PgLedger` is the production PostgreSQL store;
//!   `MemoryLedger` backs tests and paper runs with identical semantics.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool setup utilities.
//! - `LedgerStore`: the trait every component depends on.
//! - `PgLedger` / `MemoryLedger`: the two implementations.
//! - `LedgerError`: the specific error types this crate returns.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use postgres::{connect, run_migrations, PgLedger};
pub use sqlx::PgPool;
pub use store::LedgerStore;
