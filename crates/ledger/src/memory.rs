use crate::error::LedgerError;
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Anomaly, Correction, CycleOutcome, CycleRecord, Order, Position};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    positions: HashMap<Uuid, Position>,
    orders: HashMap<Uuid, Order>,
    cycles: BTreeMap<i64, CycleRecord>,
    corrections: Vec<Correction>,
    anomalies: HashMap<Uuid, Anomaly>,
    lease: Option<(String, DateTime<Utc>)>,
}

/// An in-memory `LedgerStore` with the same semantics as `PgLedger`.
///
/// Backs unit tests and paper runs. A single async mutex serializes all
/// writers, which is exactly the ordering guarantee the trait requires.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: every correction recorded so far.
    pub async fn corrections(&self) -> Vec<Correction> {
        self.inner.lock().await.corrections.clone()
    }

    /// Test hook: a position by id, live or archived.
    pub async fn position_by_id(&self, position_id: Uuid) -> Option<Position> {
        self.inner.lock().await.positions.get(&position_id).cloned()
    }

    /// Test hook: an order by id.
    pub async fn order_by_id(&self, order_id: Uuid) -> Option<Order> {
        self.inner.lock().await.orders.get(&order_id).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn upsert_position(&self, position: &Position) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        inner.positions.insert(position.position_id, position.clone());
        Ok(())
    }

    async fn live_position(&self, instrument: &str) -> Result<Option<Position>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .values()
            .find(|p| p.instrument == instrument && p.is_live())
            .cloned())
    }

    async fn live_positions(&self) -> Result<Vec<Position>, LedgerError> {
        let inner = self.inner.lock().await;
        let mut positions: Vec<Position> =
            inner.positions.values().filter(|p| p.is_live()).cloned().collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(positions)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        inner.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if !inner.orders.contains_key(&order.order_id) {
            return Err(LedgerError::NotFound);
        }
        inner.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn unresolved_orders(&self) -> Result<Vec<Order>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| o.status == core_types::OrderStatus::Unknown)
            .cloned()
            .collect())
    }

    async fn orders_for_cycle(&self, seq: i64) -> Result<Vec<Order>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.values().filter(|o| o.cycle_seq == seq).cloned().collect())
    }

    async fn begin_cycle(&self, started_at: DateTime<Utc>) -> Result<CycleRecord, LedgerError> {
        let mut inner = self.inner.lock().await;
        let seq = inner.cycles.keys().next_back().copied().unwrap_or(0) + 1;
        let record = CycleRecord {
            seq,
            started_at,
            ended_at: None,
            decision_snapshot: None,
            order_ids: Vec::new(),
            outcome: None,
        };
        inner.cycles.insert(seq, record.clone());
        Ok(record)
    }

    async fn record_decision(
        &self,
        seq: i64,
        snapshot: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let record = inner.cycles.get_mut(&seq).ok_or(LedgerError::NotFound)?;
        record.decision_snapshot = Some(snapshot);
        Ok(())
    }

    async fn attach_order(&self, seq: i64, order_id: Uuid) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let record = inner.cycles.get_mut(&seq).ok_or(LedgerError::NotFound)?;
        record.order_ids.push(order_id);
        Ok(())
    }

    async fn seal_cycle(&self, seq: i64, outcome: CycleOutcome) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let record = inner.cycles.get_mut(&seq).ok_or(LedgerError::NotFound)?;
        record.outcome = Some(outcome);
        record.ended_at = Some(Utc::now());
        Ok(())
    }

    async fn last_cycle(&self) -> Result<Option<CycleRecord>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner.cycles.values().next_back().cloned())
    }

    async fn unsealed_cycle(&self) -> Result<Option<CycleRecord>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner.cycles.values().find(|c| !c.is_sealed()).cloned())
    }

    async fn record_correction(&self, correction: &Correction) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        inner.corrections.push(correction.clone());
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: &Anomaly) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        inner.anomalies.insert(anomaly.anomaly_id, anomaly.clone());
        Ok(())
    }

    async fn open_anomalies(&self) -> Result<Vec<Anomaly>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner.anomalies.values().filter(|a| !a.cleared).cloned().collect())
    }

    async fn clear_anomaly(&self, anomaly_id: Uuid) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let anomaly = inner.anomalies.get_mut(&anomaly_id).ok_or(LedgerError::NotFound)?;
        anomaly.cleared = true;
        Ok(())
    }

    async fn acquire_lease(&self, owner: &str, ttl: Duration) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| LedgerError::CorruptRow(format!("lease ttl out of range: {e}")))?;
        match &inner.lease {
            Some((holder, expiry)) if holder != owner && *expiry > now => Ok(false),
            _ => {
                inner.lease = Some((owner.to_string(), expires_at));
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, owner: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if let Some((holder, _)) = &inner.lease {
            if holder == owner {
                inner.lease = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{OrderSide, PositionStatus};
    use rust_decimal_macros::dec;

    fn sample_position(instrument: &str, status: PositionStatus) -> Position {
        Position {
            position_id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            quantity: dec!(1),
            entry_price: dec!(100),
            current_value: dec!(100),
            opened_at: Utc::now(),
            status,
            stop_loss: None,
            take_profit: None,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cycle_sequence_is_gap_free() {
        let ledger = MemoryLedger::new();
        let first = ledger.begin_cycle(Utc::now()).await.unwrap();
        ledger.seal_cycle(first.seq, CycleOutcome::Success).await.unwrap();
        let second = ledger.begin_cycle(Utc::now()).await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn unsealed_cycle_is_found_after_crash() {
        let ledger = MemoryLedger::new();
        let record = ledger.begin_cycle(Utc::now()).await.unwrap();
        let unsealed = ledger.unsealed_cycle().await.unwrap().unwrap();
        assert_eq!(unsealed.seq, record.seq);
        ledger.seal_cycle(record.seq, CycleOutcome::PartialFailure).await.unwrap();
        assert!(ledger.unsealed_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_positions_leave_the_live_slot() {
        let ledger = MemoryLedger::new();
        let mut position = sample_position("BTC-USD", PositionStatus::Open);
        ledger.upsert_position(&position).await.unwrap();
        assert!(ledger.live_position("BTC-USD").await.unwrap().is_some());

        position.status = PositionStatus::Closed;
        position.quantity = dec!(0);
        ledger.upsert_position(&position).await.unwrap();
        assert!(ledger.live_position("BTC-USD").await.unwrap().is_none());
        // The archived row is still retrievable by id.
        assert!(ledger.position_by_id(position.position_id).await.is_some());
    }

    #[tokio::test]
    async fn lease_excludes_other_owners_until_expiry() {
        let ledger = MemoryLedger::new();
        assert!(ledger.acquire_lease("a", Duration::from_secs(60)).await.unwrap());
        assert!(!ledger.acquire_lease("b", Duration::from_secs(60)).await.unwrap());
        // Re-entrant for the same owner.
        assert!(ledger.acquire_lease("a", Duration::from_secs(60)).await.unwrap());
        ledger.release_lease("a").await.unwrap();
        assert!(ledger.acquire_lease("b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_stolen() {
        let ledger = MemoryLedger::new();
        assert!(ledger.acquire_lease("a", Duration::from_millis(0)).await.unwrap());
        assert!(ledger.acquire_lease("b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_orders_are_reported_unresolved() {
        let ledger = MemoryLedger::new();
        let mut order = Order::new(Uuid::new_v4(), "ETH-USD", OrderSide::Buy, dec!(1), None, 1);
        ledger.insert_order(&order).await.unwrap();
        assert!(ledger.unresolved_orders().await.unwrap().is_empty());

        order.status = core_types::OrderStatus::Unknown;
        ledger.update_order(&order).await.unwrap();
        let unresolved = ledger.unresolved_orders().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].order_id, order.order_id);
    }
}
