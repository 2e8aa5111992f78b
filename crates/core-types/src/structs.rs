use crate::enums::{CorrectionAction, CycleOutcome, OrderSide, OrderStatus, PositionStatus};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A held exposure to one tradable instrument.
///
/// The quantity is signed in venue-native precision: positive for long,
/// negative for short. It is zero exactly when the position is `Closed`;
/// closed positions are archived rather than deleted so the ledger keeps
/// the full trade history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub instrument: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_value: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// True while this position occupies the one-live-position-per-instrument
    /// slot (anything not yet archived).
    pub fn is_live(&self) -> bool {
        !self.status.is_closed()
    }

    /// Revalues the position against the latest mark price.
    pub fn revalue(&mut self, mark: Decimal, now: DateTime<Utc>) {
        self.current_value = self.quantity * mark;
        self.last_updated = now;
    }
}

/// A single instruction sent to a venue.
///
/// The `idempotency_key` is assigned by the engine before the first
/// submission attempt and reused for every retry, so a venue that honors
/// idempotency keys can never double-execute a retried order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub position_id: Uuid,
    pub instrument: String,
    pub side: OrderSide,
    pub requested_qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub retry_count: i32,
    pub idempotency_key: Uuid,
    pub cycle_seq: i64,
}

impl Order {
    pub fn new(
        position_id: Uuid,
        instrument: impl Into<String>,
        side: OrderSide,
        requested_qty: Decimal,
        limit_price: Option<Decimal>,
        cycle_seq: i64,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            position_id,
            instrument: instrument.into(),
            side,
            requested_qty,
            limit_price,
            submitted_at: Utc::now(),
            status: OrderStatus::Submitted,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            retry_count: 0,
            idempotency_key: Uuid::new_v4(),
            cycle_seq,
        }
    }

    /// Records a fill report from the venue, enforcing that the filled
    /// quantity never exceeds what was requested.
    pub fn record_fill(
        &mut self,
        filled_qty: Decimal,
        avg_price: Option<Decimal>,
    ) -> Result<(), CoreError> {
        if filled_qty > self.requested_qty {
            return Err(CoreError::InvalidInput(
                "filled_qty".to_string(),
                format!(
                    "fill {} exceeds requested quantity {}",
                    filled_qty, self.requested_qty
                ),
            ));
        }
        if filled_qty < Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "filled_qty".to_string(),
                format!("fill {} is negative", filled_qty),
            ));
        }
        self.filled_qty = filled_qty;
        self.filled_avg_price = avg_price;
        Ok(())
    }

    /// Quantity still outstanding on the venue.
    pub fn remaining_qty(&self) -> Decimal {
        self.requested_qty - self.filled_qty
    }

    /// The filled quantity with the sign implied by the order side.
    pub fn signed_fill(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.filled_qty,
            OrderSide::Sell => -self.filled_qty,
        }
    }
}

/// One execution of the cycle scheduler.
///
/// Sequence numbers are assigned by the ledger store and are strictly
/// increasing and gap-free. A record with `outcome = None` is in progress;
/// at most one such record exists at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub seq: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Snapshot of the decision-function output, for audit.
    pub decision_snapshot: Option<serde_json::Value>,
    pub order_ids: Vec<Uuid>,
    pub outcome: Option<CycleOutcome>,
}

impl CycleRecord {
    pub fn is_sealed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// The decision function's output: desired signed quantity per instrument.
///
/// An instrument absent from the map is treated as a zero target (close).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAllocation {
    pub targets: BTreeMap<String, Decimal>,
}

impl TargetAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, instrument: impl Into<String>, quantity: Decimal) {
        self.targets.insert(instrument.into(), quantity);
    }

    pub fn target_for(&self, instrument: &str) -> Decimal {
        self.targets.get(instrument).copied().unwrap_or(Decimal::ZERO)
    }

    /// Builds the allocation that holds the given positions unchanged.
    pub fn from_positions<'a, I: IntoIterator<Item = &'a Position>>(positions: I) -> Self {
        let mut allocation = Self::new();
        for position in positions {
            if position.is_live() {
                allocation.set(position.instrument.clone(), position.quantity);
            }
        }
        allocation
    }
}

/// A signed quantity delta for one instrument, produced by diffing the
/// target allocation against held positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub instrument: String,
    pub delta: Decimal,
    /// Mark price at decision time, used as the limit/slippage reference.
    pub reference_price: Option<Decimal>,
}

impl Adjustment {
    pub fn side(&self) -> OrderSide {
        if self.delta.is_sign_negative() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

/// A resolved discrepancy between ledger state and venue-reported truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub correction_id: Uuid,
    pub instrument: String,
    pub ledger_qty: Decimal,
    pub venue_qty: Decimal,
    pub action: CorrectionAction,
    pub observed_at: DateTime<Utc>,
}

impl Correction {
    pub fn new(
        instrument: impl Into<String>,
        ledger_qty: Decimal,
        venue_qty: Decimal,
        action: CorrectionAction,
    ) -> Self {
        Self {
            correction_id: Uuid::new_v4(),
            instrument: instrument.into(),
            ledger_qty,
            venue_qty,
            action,
            observed_at: Utc::now(),
        }
    }
}

/// An execution ambiguity reconciliation could not self-heal.
///
/// Anomalies never auto-clear: either an operator clears them or a later
/// reconciliation that resolves the underlying position does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: Uuid,
    pub instrument: String,
    pub position_id: Option<Uuid>,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
    pub cleared: bool,
}

impl Anomaly {
    pub fn new(
        instrument: impl Into<String>,
        position_id: Option<Uuid>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            anomaly_id: Uuid::new_v4(),
            instrument: instrument.into(),
            position_id,
            reason: reason.into(),
            raised_at: Utc::now(),
            cleared: false,
        }
    }
}

/// Market context handed to the decision function each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    /// Latest mark price per instrument.
    pub marks: BTreeMap<String, Decimal>,
    pub as_of: DateTime<Utc>,
}

impl MarketContext {
    pub fn new(marks: BTreeMap<String, Decimal>, as_of: DateTime<Utc>) -> Self {
        Self { marks, as_of }
    }

    pub fn mark_for(&self, instrument: &str) -> Option<Decimal> {
        self.marks.get(instrument).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            "ETH-USD",
            OrderSide::Buy,
            dec!(2.5),
            None,
            1,
        )
    }

    #[test]
    fn fill_cannot_exceed_requested_quantity() {
        let mut order = sample_order();
        assert!(order.record_fill(dec!(2.6), Some(dec!(1800))).is_err());
        assert!(order.record_fill(dec!(2.5), Some(dec!(1800))).is_ok());
        assert_eq!(order.remaining_qty(), Decimal::ZERO);
    }

    #[test]
    fn signed_fill_follows_side() {
        let mut order = sample_order();
        order.record_fill(dec!(1.0), Some(dec!(1800))).unwrap();
        assert_eq!(order.signed_fill(), dec!(1.0));
        order.side = OrderSide::Sell;
        assert_eq!(order.signed_fill(), dec!(-1.0));
    }

    #[test]
    fn allocation_defaults_missing_instruments_to_zero() {
        let mut allocation = TargetAllocation::new();
        allocation.set("BTC-USD", dec!(0.5));
        assert_eq!(allocation.target_for("BTC-USD"), dec!(0.5));
        assert_eq!(allocation.target_for("ETH-USD"), Decimal::ZERO);
    }

    #[test]
    fn adjustment_side_follows_delta_sign() {
        let buy = Adjustment {
            instrument: "BTC-USD".to_string(),
            delta: dec!(0.25),
            reference_price: None,
        };
        let sell = Adjustment {
            instrument: "BTC-USD".to_string(),
            delta: dec!(-0.25),
            reference_price: None,
        };
        assert_eq!(buy.side(), OrderSide::Buy);
        assert_eq!(sell.side(), OrderSide::Sell);
    }
}
