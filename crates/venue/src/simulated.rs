use crate::error::VenueError;
use crate::traits::{OrderTicket, VenueAdapter, VenueOrderState, VenueOrderStatus};
use async_trait::async_trait;
use core_types::OrderSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Scripted per-instrument behavior of the simulated venue.
#[derive(Debug, Clone)]
pub enum VenueBehavior {
    /// Fill the full requested quantity immediately.
    FillAll,
    /// Fill only this fraction of the requested quantity.
    PartialFill { fraction: Decimal },
    /// Reject every submission.
    Reject { reason: String },
    /// Return this many transient errors before filling. The failed
    /// attempts never reach the book, mirroring a dropped request.
    TransientErrors { failures: u32 },
    /// Execute the order but report a confirmation timeout to the caller.
    /// A later status query sees the completed fill: the classic
    /// "did my order go through?" scenario.
    SilentFill,
    /// The venue is unreachable: submissions time out and nothing reaches
    /// the book.
    Unreachable,
    /// Like SilentFill, but status queries fail too, leaving the outcome
    /// genuinely ambiguous until the venue recovers.
    SilentFillQueryFails,
}

#[derive(Debug, Clone)]
struct BookedOrder {
    ticket: OrderTicket,
    status: VenueOrderStatus,
}

#[derive(Debug, Default)]
struct VenueState {
    behaviors: HashMap<String, VenueBehavior>,
    book: HashMap<Uuid, BookedOrder>,
    balances: BTreeMap<String, Decimal>,
    marks: BTreeMap<String, Decimal>,
    transient_seen: HashMap<Uuid, u32>,
    executions: HashMap<Uuid, u32>,
    reject_duplicates: bool,
}

/// An in-process venue with scriptable failure modes.
///
/// Doubles as the paper-trading venue and as the test double for the
/// execution pipeline: it tracks how many times each idempotency key
/// actually executed, so double-execution is directly observable.
#[derive(Debug, Default)]
pub struct SimulatedVenue {
    state: Mutex<VenueState>,
    latency: Option<Duration>,
}

impl SimulatedVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds artificial latency to every submission, for exercising the
    /// scheduler's busy handling.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency: Some(latency),
        }
    }

    pub async fn set_behavior(&self, instrument: &str, behavior: VenueBehavior) {
        let mut state = self.state.lock().await;
        state.behaviors.insert(instrument.to_string(), behavior);
    }

    pub async fn set_balance(&self, instrument: &str, quantity: Decimal) {
        let mut state = self.state.lock().await;
        state.balances.insert(instrument.to_string(), quantity);
    }

    pub async fn set_mark(&self, instrument: &str, price: Decimal) {
        let mut state = self.state.lock().await;
        state.marks.insert(instrument.to_string(), price);
    }

    /// Shifts the venue-side balance without any order, simulating external
    /// drift the reconciler must detect.
    pub async fn drift_balance(&self, instrument: &str, delta: Decimal) {
        let mut state = self.state.lock().await;
        *state.balances.entry(instrument.to_string()).or_default() += delta;
    }

    /// Strict mode: a duplicate idempotency key is rejected outright
    /// instead of replayed. Used to verify the engine never resubmits a
    /// key it believes consumed.
    pub async fn reject_duplicate_keys(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.reject_duplicates = enabled;
    }

    /// How many times this key actually executed against the book.
    pub async fn executions_for(&self, idempotency_key: Uuid) -> u32 {
        let state = self.state.lock().await;
        state.executions.get(&idempotency_key).copied().unwrap_or(0)
    }

    fn fill_price(state: &VenueState, ticket: &OrderTicket) -> Decimal {
        ticket
            .limit_price
            .or_else(|| state.marks.get(&ticket.instrument).copied())
            .unwrap_or(dec!(1))
    }

    fn apply_fill(state: &mut VenueState, ticket: &OrderTicket, filled_qty: Decimal) {
        let signed = match ticket.side {
            OrderSide::Buy => filled_qty,
            OrderSide::Sell => -filled_qty,
        };
        *state.balances.entry(ticket.instrument.clone()).or_default() += signed;
        *state.executions.entry(ticket.idempotency_key).or_default() += 1;
    }
}

#[async_trait]
impl VenueAdapter for SimulatedVenue {
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<VenueOrderStatus, VenueError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().await;

        // Idempotent replay: a key the venue has seen returns the existing
        // order instead of executing again.
        if let Some(existing) = state.book.get(&ticket.idempotency_key) {
            if state.reject_duplicates {
                return Err(VenueError::Rejected(format!(
                    "duplicate idempotency key {}",
                    ticket.idempotency_key
                )));
            }
            return Ok(existing.status.clone());
        }

        let behavior = state
            .behaviors
            .get(&ticket.instrument)
            .cloned()
            .unwrap_or(VenueBehavior::FillAll);

        match behavior {
            VenueBehavior::Unreachable => Err(VenueError::ConfirmationTimeout),
            VenueBehavior::TransientErrors { failures } => {
                let seen = state.transient_seen.entry(ticket.idempotency_key).or_default();
                if *seen < failures {
                    *seen += 1;
                    return Err(VenueError::Transient("simulated venue hiccup".to_string()));
                }
                let price = Self::fill_price(&state, ticket);
                Self::apply_fill(&mut state, ticket, ticket.quantity);
                let status = VenueOrderStatus {
                    venue_order_id: ticket.idempotency_key.to_string(),
                    state: VenueOrderState::Filled,
                    filled_qty: ticket.quantity,
                    avg_price: Some(price),
                };
                state.book.insert(
                    ticket.idempotency_key,
                    BookedOrder { ticket: ticket.clone(), status: status.clone() },
                );
                Ok(status)
            }
            VenueBehavior::Reject { reason } => {
                let status = VenueOrderStatus {
                    venue_order_id: ticket.idempotency_key.to_string(),
                    state: VenueOrderState::Rejected,
                    filled_qty: Decimal::ZERO,
                    avg_price: None,
                };
                state.book.insert(
                    ticket.idempotency_key,
                    BookedOrder { ticket: ticket.clone(), status },
                );
                Err(VenueError::Rejected(reason))
            }
            VenueBehavior::PartialFill { fraction } => {
                let filled = ticket.quantity * fraction;
                let price = Self::fill_price(&state, ticket);
                Self::apply_fill(&mut state, ticket, filled);
                let status = VenueOrderStatus {
                    venue_order_id: ticket.idempotency_key.to_string(),
                    state: VenueOrderState::PartiallyFilled,
                    filled_qty: filled,
                    avg_price: Some(price),
                };
                state.book.insert(
                    ticket.idempotency_key,
                    BookedOrder { ticket: ticket.clone(), status: status.clone() },
                );
                Ok(status)
            }
            VenueBehavior::SilentFill | VenueBehavior::SilentFillQueryFails => {
                let price = Self::fill_price(&state, ticket);
                Self::apply_fill(&mut state, ticket, ticket.quantity);
                let status = VenueOrderStatus {
                    venue_order_id: ticket.idempotency_key.to_string(),
                    state: VenueOrderState::Filled,
                    filled_qty: ticket.quantity,
                    avg_price: Some(price),
                };
                state.book.insert(
                    ticket.idempotency_key,
                    BookedOrder { ticket: ticket.clone(), status },
                );
                Err(VenueError::ConfirmationTimeout)
            }
            VenueBehavior::FillAll => {
                let price = Self::fill_price(&state, ticket);
                Self::apply_fill(&mut state, ticket, ticket.quantity);
                let status = VenueOrderStatus {
                    venue_order_id: ticket.idempotency_key.to_string(),
                    state: VenueOrderState::Filled,
                    filled_qty: ticket.quantity,
                    avg_price: Some(price),
                };
                state.book.insert(
                    ticket.idempotency_key,
                    BookedOrder { ticket: ticket.clone(), status: status.clone() },
                );
                Ok(status)
            }
        }
    }

    async fn query_order_status(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<VenueOrderStatus>, VenueError> {
        let state = self.state.lock().await;
        if let Some(booked) = state.book.get(&idempotency_key) {
            if matches!(
                state.behaviors.get(&booked.ticket.instrument),
                Some(VenueBehavior::SilentFillQueryFails)
            ) {
                return Err(VenueError::Transient("status endpoint unavailable".to_string()));
            }
            return Ok(Some(booked.status.clone()));
        }
        Ok(None)
    }

    async fn cancel_order(&self, idempotency_key: Uuid) -> Result<bool, VenueError> {
        let mut state = self.state.lock().await;
        match state.book.get_mut(&idempotency_key) {
            Some(booked) if !booked.status.state.is_terminal() => {
                booked.status.state = VenueOrderState::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query_balances(&self) -> Result<BTreeMap<String, Decimal>, VenueError> {
        let state = self.state.lock().await;
        Ok(state.balances.clone())
    }
}
