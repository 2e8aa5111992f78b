use crate::error::ReconcileError;
use chrono::Utc;
use configuration::ReconciliationSettings;
use core_types::{
    Anomaly, Correction, CorrectionAction, Order, OrderStatus, PositionStatus,
};
use ledger::LedgerStore;
use positions::lifecycle;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use venue::{VenueAdapter, VenueOrderState};

/// Which instruments a reconciliation pass should touch.
#[derive(Debug, Clone)]
pub enum ReconcileScope {
    Full,
    Instruments(Vec<String>),
}

impl ReconcileScope {
    fn includes(&self, instrument: &str) -> bool {
        match self {
            ReconcileScope::Full => true,
            ReconcileScope::Instruments(list) => list.iter().any(|i| i == instrument),
        }
    }
}

/// Brings ledger state back in line with venue-reported truth.
///
/// The venue is authoritative for balances; the ledger is authoritative
/// for intent. A pass runs three phases in order: resolve parked `unknown`
/// orders by asking the venue what became of them, force stale pending
/// positions to a verdict, then sweep open-position balances for drift.
/// Every repair is applied through the position state machine and recorded
/// as a `Correction`; ambiguity the venue cannot clear up becomes an
/// `Anomaly` that waits for an operator.
pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    venue: Arc<dyn VenueAdapter>,
    settings: ReconciliationSettings,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        venue: Arc<dyn VenueAdapter>,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            ledger,
            venue,
            settings,
        }
    }

    /// Startup check: the venue must be reachable and able to report
    /// balances before any cycle is allowed to run.
    pub async fn preflight(&self) -> Result<(), ReconcileError> {
        let balances = self.venue.query_balances().await?;
        tracing::info!(instruments = balances.len(), "venue preflight passed");
        Ok(())
    }

    /// Runs one full reconciliation pass and returns the corrections it
    /// applied. A clean state yields an empty list.
    pub async fn reconcile(
        &self,
        scope: &ReconcileScope,
    ) -> Result<Vec<Correction>, ReconcileError> {
        let mut corrections = Vec::new();
        self.resolve_unknown_orders(scope, &mut corrections).await?;
        self.resolve_stale_pending(scope, &mut corrections).await?;
        self.sweep_balances(scope, &mut corrections).await?;
        for correction in &corrections {
            self.ledger.record_correction(correction).await?;
            tracing::info!(
                instrument = %correction.instrument,
                ledger_qty = %correction.ledger_qty,
                venue_qty = %correction.venue_qty,
                action = %correction.action,
                "applied correction"
            );
        }
        Ok(corrections)
    }

    /// Phase one: ask the venue what became of every order parked in
    /// `unknown` status.
    async fn resolve_unknown_orders(
        &self,
        scope: &ReconcileScope,
        corrections: &mut Vec<Correction>,
    ) -> Result<(), ReconcileError> {
        let timeout = chrono::Duration::seconds(self.settings.pending_timeout_secs as i64);
        for mut order in self.ledger.unresolved_orders().await? {
            if !scope.includes(&order.instrument) {
                continue;
            }
            match self.venue.query_order_status(order.idempotency_key).await {
                Ok(Some(status)) => {
                    if !status.state.is_terminal() {
                        // Still live at the venue: stop it so the fill
                        // quantity is final, or try again next pass.
                        if self.venue.cancel_order(order.idempotency_key).await.is_err() {
                            continue;
                        }
                    }
                    order.record_fill(status.filled_qty, status.avg_price)?;
                    order.status = match status.state {
                        VenueOrderState::Filled => OrderStatus::Filled,
                        VenueOrderState::Rejected => OrderStatus::Rejected,
                        _ if order.filled_qty.is_zero() => OrderStatus::Cancelled,
                        _ => OrderStatus::PartiallyFilled,
                    };
                    self.ledger.update_order(&order).await?;
                    tracing::info!(
                        order_id = %order.order_id,
                        status = %order.status,
                        filled_qty = %order.filled_qty,
                        "resolved parked order from venue state"
                    );
                    self.apply_resolved_fill(&order, corrections).await?;
                    self.clear_anomalies_for(order.position_id).await?;
                }
                Ok(None) => {
                    // The venue never saw the key: the submission was lost
                    // in transit and nothing executed.
                    order.status = OrderStatus::Cancelled;
                    self.ledger.update_order(&order).await?;
                    self.apply_resolved_fill(&order, corrections).await?;
                    self.clear_anomalies_for(order.position_id).await?;
                }
                Err(err) => {
                    if Utc::now() - order.submitted_at > timeout {
                        self.raise_anomaly_once(&order, &err.to_string()).await?;
                    } else {
                        tracing::debug!(
                            order_id = %order.order_id,
                            error = %err,
                            "venue still unable to report order; will retry"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Settles a resolved order's fill into its position.
    async fn apply_resolved_fill(
        &self,
        order: &Order,
        corrections: &mut Vec<Correction>,
    ) -> Result<(), ReconcileError> {
        let Some(mut position) = self.ledger.live_position(&order.instrument).await? else {
            return Ok(());
        };
        if position.position_id != order.position_id {
            return Ok(());
        }
        let now = Utc::now();
        let signed = order.signed_fill();
        let price = order.filled_avg_price.unwrap_or(position.entry_price);
        match position.status {
            PositionStatus::PendingOpen => {
                let intended = position.quantity;
                if signed.is_zero() {
                    lifecycle::abandon_open(&mut position, now)?;
                    corrections.push(Correction::new(
                        &position.instrument,
                        intended,
                        Decimal::ZERO,
                        CorrectionAction::PositionClosed,
                    ));
                } else {
                    lifecycle::confirm_open(&mut position, signed, price, now)?;
                    corrections.push(Correction::new(
                        &position.instrument,
                        intended,
                        signed,
                        CorrectionAction::PositionOpened,
                    ));
                }
            }
            PositionStatus::PendingClose => {
                let before = position.quantity;
                let residual = position.quantity + signed;
                lifecycle::confirm_close(&mut position, residual, self.settings.dust_tolerance, now)?;
                let action = if position.status.is_closed() {
                    CorrectionAction::PositionClosed
                } else {
                    CorrectionAction::QuantityAdjusted
                };
                corrections.push(Correction::new(&position.instrument, before, residual, action));
            }
            PositionStatus::Open => {
                if !signed.is_zero() {
                    let before = position.quantity;
                    lifecycle::apply_adjustment_fill(&mut position, signed, price, now)?;
                    corrections.push(Correction::new(
                        &position.instrument,
                        before,
                        position.quantity,
                        CorrectionAction::QuantityAdjusted,
                    ));
                }
            }
            PositionStatus::Closed => {}
        }
        self.ledger.upsert_position(&position).await?;
        Ok(())
    }

    /// Phase two: positions stuck pending past the timeout with no parked
    /// order left to explain them. The venue balance is the verdict.
    async fn resolve_stale_pending(
        &self,
        scope: &ReconcileScope,
        corrections: &mut Vec<Correction>,
    ) -> Result<(), ReconcileError> {
        let timeout = chrono::Duration::seconds(self.settings.pending_timeout_secs as i64);
        let now = Utc::now();
        let awaiting: HashSet<Uuid> = self
            .ledger
            .unresolved_orders()
            .await?
            .iter()
            .map(|o| o.position_id)
            .collect();

        let stale: Vec<_> = self
            .ledger
            .live_positions()
            .await?
            .into_iter()
            .filter(|p| {
                p.status.is_pending()
                    && scope.includes(&p.instrument)
                    && now - p.last_updated > timeout
                    && !awaiting.contains(&p.position_id)
            })
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        let balances = self.venue.query_balances().await?;
        for mut position in stale {
            let venue_qty = balances
                .get(&position.instrument)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let before = position.quantity;
            tracing::warn!(
                instrument = %position.instrument,
                status = %position.status,
                venue_qty = %venue_qty,
                "forcing verdict on stale pending position"
            );
            match position.status {
                PositionStatus::PendingOpen if venue_qty.abs() <= self.settings.dust_tolerance => {
                    lifecycle::abandon_open(&mut position, now)?;
                    corrections.push(Correction::new(
                        &position.instrument,
                        before,
                        Decimal::ZERO,
                        CorrectionAction::PositionClosed,
                    ));
                }
                PositionStatus::PendingOpen => {
                    let entry = position.entry_price;
                    lifecycle::confirm_open(&mut position, venue_qty, entry, now)?;
                    corrections.push(Correction::new(
                        &position.instrument,
                        before,
                        venue_qty,
                        CorrectionAction::PositionOpened,
                    ));
                }
                PositionStatus::PendingClose => {
                    lifecycle::confirm_close(
                        &mut position,
                        venue_qty,
                        self.settings.dust_tolerance,
                        now,
                    )?;
                    let action = if position.status.is_closed() {
                        CorrectionAction::PositionClosed
                    } else {
                        CorrectionAction::QuantityAdjusted
                    };
                    corrections.push(Correction::new(&position.instrument, before, venue_qty, action));
                }
                _ => continue,
            }
            self.ledger.upsert_position(&position).await?;
        }
        Ok(())
    }

    /// Phase three: compare every open position against the venue balance
    /// and flag venue holdings the ledger does not track.
    async fn sweep_balances(
        &self,
        scope: &ReconcileScope,
        corrections: &mut Vec<Correction>,
    ) -> Result<(), ReconcileError> {
        let balances = self.venue.query_balances().await?;
        let live = self.ledger.live_positions().await?;
        let tracked: HashSet<String> = live.iter().map(|p| p.instrument.clone()).collect();
        let now = Utc::now();

        for mut position in live {
            if position.status != PositionStatus::Open || !scope.includes(&position.instrument) {
                continue;
            }
            let venue_qty = balances
                .get(&position.instrument)
                .copied()
                .unwrap_or(Decimal::ZERO);
            if (venue_qty - position.quantity).abs() <= self.settings.dust_tolerance {
                continue;
            }
            let before = position.quantity;
            lifecycle::force_quantity(&mut position, venue_qty, now);
            self.ledger.upsert_position(&position).await?;
            let action = if venue_qty.is_zero() {
                CorrectionAction::PositionClosed
            } else {
                CorrectionAction::QuantityAdjusted
            };
            corrections.push(Correction::new(&position.instrument, before, venue_qty, action));
        }

        for (instrument, venue_qty) in &balances {
            if tracked.contains(instrument.as_str())
                || !scope.includes(instrument)
                || venue_qty.abs() <= self.settings.dust_tolerance
            {
                continue;
            }
            corrections.push(Correction::new(
                instrument,
                Decimal::ZERO,
                *venue_qty,
                CorrectionAction::AnomalyFlagged,
            ));
            let already_open = self
                .ledger
                .open_anomalies()
                .await?
                .iter()
                .any(|a| a.instrument == *instrument && a.position_id.is_none());
            if !already_open {
                self.ledger
                    .record_anomaly(&Anomaly::new(
                        instrument,
                        None,
                        format!("venue holds untracked balance of {venue_qty}"),
                    ))
                    .await?;
            }
        }
        Ok(())
    }

    /// Records an ambiguity anomaly for an order, at most once while open.
    async fn raise_anomaly_once(&self, order: &Order, reason: &str) -> Result<(), ReconcileError> {
        let already_open = self
            .ledger
            .open_anomalies()
            .await?
            .iter()
            .any(|a| a.position_id == Some(order.position_id));
        if already_open {
            return Ok(());
        }
        tracing::error!(
            order_id = %order.order_id,
            instrument = %order.instrument,
            reason = %reason,
            "order outcome still ambiguous past timeout; raising anomaly"
        );
        self.ledger
            .record_anomaly(&Anomaly::new(
                &order.instrument,
                Some(order.position_id),
                format!("order {} unresolved past timeout: {reason}", order.order_id),
            ))
            .await
            .map_err(ReconcileError::from)
    }

    /// An order resolution also settles any anomaly it raised.
    async fn clear_anomalies_for(&self, position_id: Uuid) -> Result<(), ReconcileError> {
        for anomaly in self.ledger.open_anomalies().await? {
            if anomaly.position_id == Some(position_id) {
                self.ledger.clear_anomaly(anomaly.anomaly_id).await?;
            }
        }
        Ok(())
    }
}
