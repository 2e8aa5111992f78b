//! # Meridian Venue Crate
//!
//! This crate is the capability boundary to external trading venues. The
//! engine never sees a wire protocol: it sees the `VenueAdapter` trait and
//! nothing else.
//!
//! ## Architectural Principles
//!
//! - **Venue Truth:** Whatever an adapter reports from `query_balances` and
//!   `query_order_status` is authoritative over ledger state for quantities
//!   and fill status. The reconciler is built on that rule.
//! - **Idempotency First:** Every submission carries a client-assigned
//!   idempotency key. Resubmitting the same ticket must never double-execute
//!   on a conforming venue; the simulated venue enforces this and tests rely
//!   on it.
//! - **Simulated by Default:** `SimulatedVenue` is a full in-process venue
//!   with scriptable failure behavior. Real adapters are integration points
//!   supplied by deployments, not by this workspace.
//!
//! ## Public API
//!
//! - `VenueAdapter`: the capability trait.
//! - `OrderTicket` / `VenueOrderStatus` / `VenueOrderState`: the wire-free
//!   submission and fill-report types.
//! - `SimulatedVenue` / `VenueBehavior`: the scriptable test venue.
//! - `VenueError`: the transient/rejected/timeout error taxonomy.

pub mod error;
pub mod simulated;
pub mod traits;

// Re-export the key components to create a clean, public-facing API.
pub use error::VenueError;
pub use simulated::{SimulatedVenue, VenueBehavior};
pub use traits::{OrderTicket, VenueAdapter, VenueOrderState, VenueOrderStatus};
