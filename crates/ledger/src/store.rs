use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Anomaly, Correction, CycleOutcome, CycleRecord, Order, Position};
use std::time::Duration;
use uuid::Uuid;

/// The durable record of everything the engine believes about the world.
///
/// Implementations must serialize concurrent writers: two tasks persisting
/// different instruments may interleave freely, but writes to one entity are
/// applied in call order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- Positions ---

    /// Inserts or replaces a position by `position_id`.
    async fn upsert_position(&self, position: &Position) -> Result<(), LedgerError>;

    /// The one non-closed position for an instrument, if any.
    async fn live_position(&self, instrument: &str) -> Result<Option<Position>, LedgerError>;

    /// All non-closed positions.
    async fn live_positions(&self) -> Result<Vec<Position>, LedgerError>;

    // --- Orders ---

    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError>;

    async fn update_order(&self, order: &Order) -> Result<(), LedgerError>;

    /// Orders in `Unknown` status, awaiting reconciliation.
    async fn unresolved_orders(&self) -> Result<Vec<Order>, LedgerError>;

    async fn orders_for_cycle(&self, seq: i64) -> Result<Vec<Order>, LedgerError>;

    // --- Cycle records ---

    /// Opens a new cycle record with the next gap-free sequence number.
    async fn begin_cycle(&self, started_at: DateTime<Utc>) -> Result<CycleRecord, LedgerError>;

    /// Attaches the decision-function output snapshot to an open cycle.
    async fn record_decision(
        &self,
        seq: i64,
        snapshot: serde_json::Value,
    ) -> Result<(), LedgerError>;

    /// Links an order created during the cycle to its record.
    async fn attach_order(&self, seq: i64, order_id: Uuid) -> Result<(), LedgerError>;

    /// Seals a cycle with its outcome classification. Sealing is terminal.
    async fn seal_cycle(&self, seq: i64, outcome: CycleOutcome) -> Result<(), LedgerError>;

    /// The most recently started cycle, sealed or not.
    async fn last_cycle(&self) -> Result<Option<CycleRecord>, LedgerError>;

    /// The in-progress cycle left behind by a crash, if one exists.
    async fn unsealed_cycle(&self) -> Result<Option<CycleRecord>, LedgerError>;

    // --- Corrections & anomalies ---

    async fn record_correction(&self, correction: &Correction) -> Result<(), LedgerError>;

    async fn record_anomaly(&self, anomaly: &Anomaly) -> Result<(), LedgerError>;

    /// Anomalies an operator (or a later reconciliation) has not cleared.
    async fn open_anomalies(&self) -> Result<Vec<Anomaly>, LedgerError>;

    async fn clear_anomaly(&self, anomaly_id: Uuid) -> Result<(), LedgerError>;

    // --- Cycle lease ---

    /// Attempts to take the global cycle lease. Returns `true` when the
    /// lease is free, expired, or already held by this owner; `false` when
    /// another live owner holds it.
    async fn acquire_lease(&self, owner: &str, ttl: Duration) -> Result<bool, LedgerError>;

    /// Releases the lease if held by this owner. Releasing a lease another
    /// owner holds is a no-op.
    async fn release_lease(&self, owner: &str) -> Result<(), LedgerError>;
}
