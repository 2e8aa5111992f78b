//! # Meridian Core Types
//!
//! This crate defines the shared domain vocabulary for the whole engine:
//! positions, orders, cycle records, corrections and the enums that govern
//! their lifecycles.
//!
//! ## Architectural Principles
//!
//! - **Layer 0 Leaf:** This crate depends on nothing else in the workspace.
//!   Every other crate speaks these types, so they must stay free of any
//!   persistence, networking or scheduling concern.
//! - **Decimal Everywhere:** All quantities and prices are `rust_decimal`
//!   values in venue-native precision. Floats never appear in accounting.
//! - **Lifecycle as Data:** Status enums carry the legal lifecycle; the
//!   transition logic itself lives in the `positions` crate.

pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{CorrectionAction, CycleOutcome, OrderSide, OrderStatus, PositionStatus};
pub use error::CoreError;
pub use structs::{
    Adjustment, Anomaly, Correction, CycleRecord, MarketContext, Order, Position,
    TargetAllocation,
};
