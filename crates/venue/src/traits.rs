use crate::error::VenueError;
use async_trait::async_trait;
use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single submission to a venue, identified by a client-assigned
/// idempotency key. Retries reuse the same ticket unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTicket {
    pub idempotency_key: Uuid,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Where the venue believes an order is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueOrderState {
    Accepted,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl VenueOrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VenueOrderState::Filled | VenueOrderState::Rejected | VenueOrderState::Cancelled
        )
    }
}

/// A venue's report on one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueOrderStatus {
    pub venue_order_id: String,
    pub state: VenueOrderState,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

/// The abstract capability set a trading venue must provide.
///
/// The engine is injected with an `Arc<dyn VenueAdapter>` at construction
/// and never learns which venue it is talking to. Implementations must be
/// idempotent-safe for `submit_order`: resubmitting a ticket whose key the
/// venue has already seen returns the existing order's status instead of
/// executing again.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Submits an order, or re-queries it if the idempotency key is known.
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<VenueOrderStatus, VenueError>;

    /// Looks up an order by its idempotency key. `None` means the venue has
    /// never seen the key, meaning the submission never reached it.
    async fn query_order_status(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<VenueOrderStatus>, VenueError>;

    /// Cancels the unfilled remainder of an order. Returns `false` when the
    /// order was already terminal.
    async fn cancel_order(&self, idempotency_key: Uuid) -> Result<bool, VenueError>;

    /// The venue's authoritative per-instrument holdings.
    async fn query_balances(&self) -> Result<BTreeMap<String, Decimal>, VenueError>;
}
