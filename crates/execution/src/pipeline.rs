use crate::error::ExecutionError;
use crate::router::OrderRouter;
use chrono::Utc;
use configuration::ExecutionSettings;
use core_types::{Adjustment, Anomaly, Order, OrderStatus, Position};
use ledger::LedgerStore;
use positions::lifecycle;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use venue::{OrderTicket, VenueAdapter, VenueError, VenueOrderStatus};

/// How one adjustment's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The router produced no orders.
    NoAction,
    /// Every order filled, possibly with an accepted dust remainder.
    Completed,
    /// A fill landed but fell short of the request beyond tolerance. The
    /// position reflects exactly the confirmed fill.
    Truncated,
    /// The venue refused the order, or nothing executed. The position was
    /// settled back to its pre-adjustment state.
    Rejected,
    /// The submission outcome could not be confirmed. The order is parked
    /// in `unknown` status and the position left pending for the
    /// reconciler. Nothing is assumed.
    Unresolved,
}

/// The pipeline's report for one adjustment, including every order it
/// persisted along the way (compensating unwind orders included).
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub order_ids: Vec<Uuid>,
}

impl ExecutionReport {
    fn no_action() -> Self {
        Self {
            outcome: ExecutionOutcome::NoAction,
            order_ids: Vec::new(),
        }
    }
}

/// What the adjustment means for the instrument's position slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Open,
    Close,
    Resize,
}

/// Where a submission attempt landed after the retry budget.
enum Submission {
    Confirmed(VenueOrderStatus),
    Rejected(String),
    Unknown,
}

/// Drives one adjustment from routed order to settled position.
///
/// The discipline throughout is write-ahead: the order row and the pending
/// position transition are persisted before the first byte goes to the
/// venue, so a crash at any point leaves a record the reconciler can
/// resolve. Retries of transient failures reuse the original idempotency
/// key, which makes resubmission safe against double execution.
pub struct ExecutionPipeline {
    ledger: Arc<dyn LedgerStore>,
    venue: Arc<dyn VenueAdapter>,
    router: Arc<dyn OrderRouter>,
    settings: ExecutionSettings,
    dust_tolerance: Decimal,
}

impl ExecutionPipeline {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        venue: Arc<dyn VenueAdapter>,
        router: Arc<dyn OrderRouter>,
        settings: ExecutionSettings,
        dust_tolerance: Decimal,
    ) -> Self {
        Self {
            ledger,
            venue,
            router,
            settings,
            dust_tolerance,
        }
    }

    /// The quantity below which a residual is treated as flat.
    pub fn dust_tolerance(&self) -> Decimal {
        self.dust_tolerance
    }

    /// Executes one adjustment within the given cycle.
    pub async fn execute(
        &self,
        cycle_seq: i64,
        adjustment: &Adjustment,
    ) -> Result<ExecutionReport, ExecutionError> {
        let legs = self.router.route(adjustment)?;
        if legs.is_empty() {
            return Ok(ExecutionReport::no_action());
        }

        let now = Utc::now();
        let (mut position, intent) = match self.ledger.live_position(&adjustment.instrument).await? {
            Some(p) if p.status.is_pending() => {
                return Err(ExecutionError::PositionPending(adjustment.instrument.clone()));
            }
            Some(mut p) if (p.quantity + adjustment.delta).is_zero() => {
                lifecycle::begin_close(&mut p, now)?;
                self.ledger.upsert_position(&p).await?;
                (p, Intent::Close)
            }
            Some(p) => (p, Intent::Resize),
            None => {
                let mark = adjustment.reference_price.ok_or_else(|| {
                    ExecutionError::MissingReferencePrice(adjustment.instrument.clone())
                })?;
                let p = lifecycle::create_pending_open(
                    &adjustment.instrument,
                    adjustment.delta,
                    mark,
                    None,
                    None,
                    now,
                )?;
                self.ledger.upsert_position(&p).await?;
                (p, Intent::Open)
            }
        };

        let mut order_ids = Vec::new();
        let mut completed: Vec<Order> = Vec::new();

        for leg in &legs {
            let mut order = Order::new(
                position.position_id,
                &leg.instrument,
                leg.side,
                leg.quantity,
                leg.limit_price,
                cycle_seq,
            );
            self.ledger.insert_order(&order).await?;
            self.ledger.attach_order(cycle_seq, order.order_id).await?;
            order_ids.push(order.order_id);

            match self.submit_with_retries(&mut order).await? {
                Submission::Confirmed(status) => {
                    match self.settle_confirmed(&mut order, status).await? {
                        true => completed.push(order),
                        false => {
                            return Ok(ExecutionReport {
                                outcome: ExecutionOutcome::Unresolved,
                                order_ids,
                            });
                        }
                    }
                }
                Submission::Rejected(reason) => {
                    tracing::warn!(
                        order_id = %order.order_id,
                        instrument = %order.instrument,
                        reason = %reason,
                        "order rejected by venue"
                    );
                    order.status = OrderStatus::Rejected;
                    self.ledger.update_order(&order).await?;
                    return self
                        .settle_failed_route(&mut position, intent, &completed, cycle_seq, order_ids)
                        .await;
                }
                Submission::Unknown => {
                    order.status = OrderStatus::Unknown;
                    self.ledger.update_order(&order).await?;
                    tracing::warn!(
                        order_id = %order.order_id,
                        instrument = %order.instrument,
                        "order outcome unconfirmed; parked for reconciliation"
                    );
                    return Ok(ExecutionReport {
                        outcome: ExecutionOutcome::Unresolved,
                        order_ids,
                    });
                }
            }
        }

        let truncated = completed
            .iter()
            .any(|o| o.remaining_qty() / o.requested_qty > self.settings.partial_fill_tolerance_pct);

        if intent == Intent::Open && truncated && !self.settings.accept_partial_open {
            // Policy says a short-filled open is not a position worth
            // holding: unwind the fill and archive.
            return self
                .settle_failed_route(&mut position, intent, &completed, cycle_seq, order_ids)
                .await;
        }

        let now = Utc::now();
        let signed: Decimal = completed
            .iter()
            .filter(|o| o.instrument == adjustment.instrument)
            .map(Order::signed_fill)
            .sum();
        let fill_price = completed
            .iter()
            .find(|o| o.instrument == adjustment.instrument)
            .and_then(|o| o.filled_avg_price)
            .or(adjustment.reference_price)
            .unwrap_or(position.entry_price);

        let outcome = match intent {
            Intent::Open => {
                if signed.is_zero() {
                    lifecycle::abandon_open(&mut position, now)?;
                    ExecutionOutcome::Rejected
                } else {
                    lifecycle::confirm_open(&mut position, signed, fill_price, now)?;
                    if truncated {
                        ExecutionOutcome::Truncated
                    } else {
                        ExecutionOutcome::Completed
                    }
                }
            }
            Intent::Close => {
                let residual = position.quantity + signed;
                lifecycle::confirm_close(&mut position, residual, self.dust_tolerance, now)?;
                if truncated {
                    ExecutionOutcome::Truncated
                } else {
                    ExecutionOutcome::Completed
                }
            }
            Intent::Resize => {
                if !signed.is_zero() {
                    lifecycle::apply_adjustment_fill(&mut position, signed, fill_price, now)?;
                }
                if truncated {
                    ExecutionOutcome::Truncated
                } else if signed.is_zero() {
                    ExecutionOutcome::Rejected
                } else {
                    ExecutionOutcome::Completed
                }
            }
        };
        self.ledger.upsert_position(&position).await?;

        Ok(ExecutionReport { outcome, order_ids })
    }

    /// Submits one order, retrying transient failures with doubled backoff
    /// and the same idempotency key.
    async fn submit_with_retries(&self, order: &mut Order) -> Result<Submission, ExecutionError> {
        let ticket = OrderTicket {
            idempotency_key: order.idempotency_key,
            instrument: order.instrument.clone(),
            side: order.side,
            quantity: order.requested_qty,
            limit_price: order.limit_price,
        };
        let mut backoff = Duration::from_millis(self.settings.retry_backoff_ms);
        loop {
            match self.venue.submit_order(&ticket).await {
                Ok(status) => return Ok(Submission::Confirmed(status)),
                Err(err) if err.is_transient() => {
                    if order.retry_count as u32 >= self.settings.max_retries {
                        return Ok(Submission::Rejected(format!(
                            "retry budget exhausted: {err}"
                        )));
                    }
                    order.retry_count += 1;
                    self.ledger.update_order(order).await?;
                    tracing::warn!(
                        order_id = %order.order_id,
                        attempt = order.retry_count,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient venue error; retrying with same idempotency key"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(VenueError::Rejected(reason)) => return Ok(Submission::Rejected(reason)),
                Err(err) => {
                    tracing::warn!(order_id = %order.order_id, error = %err, "submission outcome ambiguous");
                    return Ok(Submission::Unknown);
                }
            }
        }
    }

    /// Finalizes a venue-confirmed submission: cancels any live remainder,
    /// records the fill and persists the terminal order status. Returns
    /// `false` when the remainder could not be cancelled and the order had
    /// to be parked as `unknown`.
    async fn settle_confirmed(
        &self,
        order: &mut Order,
        status: VenueOrderStatus,
    ) -> Result<bool, ExecutionError> {
        let mut confirmed = status;
        if !confirmed.state.is_terminal() {
            match self.venue.cancel_order(order.idempotency_key).await {
                Ok(_) => {
                    // Pick up fills that landed between submit and cancel.
                    if let Ok(Some(latest)) =
                        self.venue.query_order_status(order.idempotency_key).await
                    {
                        confirmed = latest;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        order_id = %order.order_id,
                        error = %err,
                        "failed to cancel live remainder; parking order"
                    );
                    order.status = OrderStatus::Unknown;
                    self.ledger.update_order(order).await?;
                    return Ok(false);
                }
            }
        }
        order.record_fill(confirmed.filled_qty, confirmed.avg_price)?;
        order.status = if order.remaining_qty().is_zero() {
            OrderStatus::Filled
        } else if order.filled_qty.is_zero() {
            OrderStatus::Cancelled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.ledger.update_order(order).await?;
        Ok(true)
    }

    /// A leg failed after zero or more legs filled. With no fills the
    /// position is settled back untouched; with fills the route is
    /// all-or-nothing, so the filled legs are unwound with compensating
    /// orders. An unwind that itself fails raises an anomaly and leaves
    /// the position for the reconciler.
    async fn settle_failed_route(
        &self,
        position: &mut Position,
        intent: Intent,
        completed: &[Order],
        cycle_seq: i64,
        mut order_ids: Vec<Uuid>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let filled: Vec<&Order> = completed.iter().filter(|o| !o.filled_qty.is_zero()).collect();
        if !filled.is_empty() {
            match self.unwind(&filled, cycle_seq, &mut order_ids).await? {
                true => {}
                false => {
                    let anomaly = Anomaly::new(
                        &position.instrument,
                        Some(position.position_id),
                        "partial multi-leg execution could not be unwound",
                    );
                    self.ledger.record_anomaly(&anomaly).await?;
                    return Ok(ExecutionReport {
                        outcome: ExecutionOutcome::Unresolved,
                        order_ids,
                    });
                }
            }
        }
        let now = Utc::now();
        match intent {
            Intent::Open => lifecycle::abandon_open(position, now)?,
            Intent::Close => {
                lifecycle::confirm_close(position, position.quantity, self.dust_tolerance, now)?
            }
            Intent::Resize => {}
        }
        self.ledger.upsert_position(position).await?;
        Ok(ExecutionReport {
            outcome: ExecutionOutcome::Rejected,
            order_ids,
        })
    }

    /// Issues compensating orders for already-filled legs. Returns `false`
    /// when any compensation failed to execute cleanly.
    async fn unwind(
        &self,
        filled: &[&Order],
        cycle_seq: i64,
        order_ids: &mut Vec<Uuid>,
    ) -> Result<bool, ExecutionError> {
        for original in filled {
            let mut compensation = Order::new(
                original.position_id,
                &original.instrument,
                original.side.opposite(),
                original.filled_qty,
                None,
                cycle_seq,
            );
            self.ledger.insert_order(&compensation).await?;
            self.ledger.attach_order(cycle_seq, compensation.order_id).await?;
            order_ids.push(compensation.order_id);

            match self.submit_with_retries(&mut compensation).await? {
                Submission::Confirmed(status) => {
                    if !self.settle_confirmed(&mut compensation, status).await? {
                        return Ok(false);
                    }
                    if !compensation.remaining_qty().is_zero() {
                        return Ok(false);
                    }
                }
                Submission::Rejected(_) | Submission::Unknown => {
                    compensation.status = OrderStatus::Unknown;
                    self.ledger.update_order(&compensation).await?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{DirectRouter, OrderLeg};
    use core_types::{OrderSide, PositionStatus};
    use ledger::MemoryLedger;
    use rust_decimal_macros::dec;
    use venue::{SimulatedVenue, VenueBehavior};

    fn fast_settings() -> ExecutionSettings {
        ExecutionSettings {
            retry_backoff_ms: 1,
            ..ExecutionSettings::default()
        }
    }

    fn pipeline(
        ledger: Arc<MemoryLedger>,
        venue: Arc<SimulatedVenue>,
        settings: ExecutionSettings,
    ) -> ExecutionPipeline {
        ExecutionPipeline::new(ledger, venue, Arc::new(DirectRouter), settings, dec!(0.0001))
    }

    fn buy(instrument: &str, qty: Decimal, price: Decimal) -> Adjustment {
        Adjustment {
            instrument: instrument.to_string(),
            delta: qty,
            reference_price: Some(price),
        }
    }

    async fn open_cycle(ledger: &MemoryLedger) -> i64 {
        ledger.begin_cycle(Utc::now()).await.unwrap().seq
    }

    #[tokio::test]
    async fn opening_order_fills_and_confirms_the_position() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue.set_mark("BTC-USD", dec!(50000)).await;
        let pipeline = pipeline(ledger.clone(), venue, fast_settings());
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(1.5), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Completed);
        let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.quantity, dec!(1.5));
        let orders = ledger.orders_for_cycle(seq).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn transient_errors_retry_with_the_same_key() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue.set_mark("BTC-USD", dec!(50000)).await;
        venue
            .set_behavior("BTC-USD", VenueBehavior::TransientErrors { failures: 2 })
            .await;
        venue.reject_duplicate_keys(true).await;
        let pipeline = pipeline(ledger.clone(), venue.clone(), fast_settings());
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(1), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Completed);
        let orders = ledger.orders_for_cycle(seq).await.unwrap();
        assert_eq!(orders[0].retry_count, 2);
        // The venue executed the key exactly once despite the retries.
        assert_eq!(venue.executions_for(orders[0].idempotency_key).await, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_settle_as_rejected() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue
            .set_behavior("BTC-USD", VenueBehavior::TransientErrors { failures: 10 })
            .await;
        let pipeline = pipeline(ledger.clone(), venue, fast_settings());
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(1), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Rejected);
        // Nothing executed, so the slot is free again.
        assert!(ledger.live_position("BTC-USD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_fill_within_tolerance_completes() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue.set_mark("BTC-USD", dec!(50000)).await;
        venue
            .set_behavior(
                "BTC-USD",
                VenueBehavior::PartialFill { fraction: dec!(0.98) },
            )
            .await;
        let pipeline = pipeline(ledger.clone(), venue, fast_settings());
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(2), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Completed);
        let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.quantity, dec!(1.96));
    }

    #[tokio::test]
    async fn truncated_close_returns_the_residual_to_open() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue.set_mark("ETH-USD", dec!(2000)).await;
        venue
            .set_behavior(
                "ETH-USD",
                VenueBehavior::PartialFill { fraction: dec!(0.5) },
            )
            .await;
        let pipeline = pipeline(ledger.clone(), venue, fast_settings());
        let seq = open_cycle(&ledger).await;

        let mut opened =
            lifecycle::create_pending_open("ETH-USD", dec!(10), dec!(2000), None, None, Utc::now())
                .unwrap();
        lifecycle::confirm_open(&mut opened, dec!(10), dec!(2000), Utc::now()).unwrap();
        ledger.upsert_position(&opened).await.unwrap();

        let report = pipeline
            .execute(seq, &buy("ETH-USD", dec!(-10), dec!(2000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Truncated);
        let position = ledger.live_position("ETH-USD").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.quantity, dec!(5));
    }

    #[tokio::test]
    async fn rejected_open_is_abandoned() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue
            .set_behavior(
                "BTC-USD",
                VenueBehavior::Reject { reason: "insufficient margin".to_string() },
            )
            .await;
        let pipeline = pipeline(ledger.clone(), venue, fast_settings());
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(1), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Rejected);
        assert!(ledger.live_position("BTC-USD").await.unwrap().is_none());
        let orders = ledger.orders_for_cycle(seq).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn unconfirmed_submission_parks_the_order_as_unknown() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue.set_mark("BTC-USD", dec!(50000)).await;
        venue.set_behavior("BTC-USD", VenueBehavior::SilentFill).await;
        let pipeline = pipeline(ledger.clone(), venue, fast_settings());
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(1), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Unresolved);
        let orders = ledger.orders_for_cycle(seq).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Unknown);
        let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::PendingOpen);
        let unresolved = ledger.unresolved_orders().await.unwrap();
        assert_eq!(unresolved.len(), 1);
    }

    /// A two-leg router for a synthetic pair, used to exercise the
    /// all-or-nothing unwind.
    struct PairRouter;

    impl OrderRouter for PairRouter {
        fn route(&self, adjustment: &Adjustment) -> Result<Vec<OrderLeg>, ExecutionError> {
            Ok(vec![
                OrderLeg {
                    instrument: adjustment.instrument.clone(),
                    side: adjustment.side(),
                    quantity: adjustment.delta.abs(),
                    limit_price: adjustment.reference_price,
                },
                OrderLeg {
                    instrument: "HEDGE-USD".to_string(),
                    side: adjustment.side().opposite(),
                    quantity: adjustment.delta.abs(),
                    limit_price: None,
                },
            ])
        }
    }

    #[tokio::test]
    async fn failed_leg_unwinds_the_filled_legs() {
        let ledger = Arc::new(MemoryLedger::new());
        let venue = Arc::new(SimulatedVenue::new());
        venue.set_mark("BTC-USD", dec!(50000)).await;
        venue
            .set_behavior(
                "HEDGE-USD",
                VenueBehavior::Reject { reason: "instrument halted".to_string() },
            )
            .await;
        let pipeline = ExecutionPipeline::new(
            ledger.clone(),
            venue.clone(),
            Arc::new(PairRouter),
            fast_settings(),
            dec!(0.0001),
        );
        let seq = open_cycle(&ledger).await;

        let report = pipeline
            .execute(seq, &buy("BTC-USD", dec!(2), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Rejected);
        // First leg filled then was compensated back to flat.
        let balances = venue.query_balances().await.unwrap();
        assert_eq!(balances.get("BTC-USD").copied().unwrap_or_default(), dec!(0));
        assert!(ledger.live_position("BTC-USD").await.unwrap().is_none());
        // Three orders: leg, failed leg, compensation.
        assert_eq!(ledger.orders_for_cycle(seq).await.unwrap().len(), 3);
    }
}
