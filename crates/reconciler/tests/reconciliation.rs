//! End-to-end reconciliation scenarios driven through the execution
//! pipeline and the in-memory ledger.

use chrono::Utc;
use configuration::{ExecutionSettings, ReconciliationSettings};
use core_types::{Adjustment, CorrectionAction, Order, OrderSide, OrderStatus, PositionStatus};
use execution::{DirectRouter, ExecutionOutcome, ExecutionPipeline};
use ledger::{LedgerStore, MemoryLedger};
use positions::lifecycle;
use reconciler::{ReconcileScope, Reconciler};
use rust_decimal_macros::dec;
use std::sync::Arc;
use venue::{SimulatedVenue, VenueBehavior};

fn reconciliation(pending_timeout_secs: u64) -> ReconciliationSettings {
    ReconciliationSettings {
        pending_timeout_secs,
        ..ReconciliationSettings::default()
    }
}

fn pipeline(ledger: Arc<MemoryLedger>, venue: Arc<SimulatedVenue>) -> ExecutionPipeline {
    let settings = ExecutionSettings {
        retry_backoff_ms: 1,
        ..ExecutionSettings::default()
    };
    ExecutionPipeline::new(ledger, venue, Arc::new(DirectRouter), settings, dec!(0.0001))
}

fn buy(instrument: &str, qty: rust_decimal::Decimal, price: rust_decimal::Decimal) -> Adjustment {
    Adjustment {
        instrument: instrument.to_string(),
        delta: qty,
        reference_price: Some(price),
    }
}

async fn seed_open_position(
    ledger: &MemoryLedger,
    venue: &SimulatedVenue,
    instrument: &str,
    qty: rust_decimal::Decimal,
    price: rust_decimal::Decimal,
) {
    let mut position =
        lifecycle::create_pending_open(instrument, qty, price, None, None, Utc::now()).unwrap();
    lifecycle::confirm_open(&mut position, qty, price, Utc::now()).unwrap();
    ledger.upsert_position(&position).await.unwrap();
    venue.set_balance(instrument, qty).await;
    venue.set_mark(instrument, price).await;
}

#[tokio::test]
async fn clean_state_yields_zero_corrections() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    seed_open_position(&ledger, &venue, "BTC-USD", dec!(1.5), dec!(50000)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert!(corrections.is_empty());
    assert!(ledger.corrections().await.is_empty());
    let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
    assert_eq!(position.quantity, dec!(1.5));
}

#[tokio::test]
async fn balance_drift_yields_exactly_one_correction() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    seed_open_position(&ledger, &venue, "BTC-USD", dec!(10), dec!(50000)).await;
    // 5% of the holding disappears on the venue side.
    venue.drift_balance("BTC-USD", dec!(-0.5)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::QuantityAdjusted);
    assert_eq!(corrections[0].ledger_qty, dec!(10));
    assert_eq!(corrections[0].venue_qty, dec!(9.5));
    let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
    assert_eq!(position.quantity, dec!(9.5));
}

#[tokio::test]
async fn repaired_drift_does_not_correct_twice() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    seed_open_position(&ledger, &venue, "BTC-USD", dec!(10), dec!(50000)).await;
    venue.drift_balance("BTC-USD", dec!(-0.5)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    reconciler.reconcile(&ReconcileScope::Full).await.unwrap();
    let second = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert!(second.is_empty());
    assert_eq!(ledger.corrections().await.len(), 1);
}

#[tokio::test]
async fn silent_fill_is_resolved_from_venue_state() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    venue.set_mark("BTC-USD", dec!(50000)).await;
    venue.set_behavior("BTC-USD", VenueBehavior::SilentFill).await;

    // Submission times out; the order is parked and the position pending.
    let seq = ledger.begin_cycle(Utc::now()).await.unwrap().seq;
    let report = pipeline(ledger.clone(), venue.clone())
        .execute(seq, &buy("BTC-USD", dec!(1), dec!(50000)))
        .await
        .unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Unresolved);

    // The venue actually filled it, and the status query says so.
    venue.set_behavior("BTC-USD", VenueBehavior::FillAll).await;
    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::PositionOpened);
    let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Open);
    assert_eq!(position.quantity, dec!(1));
    assert!(ledger.unresolved_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn order_the_venue_never_saw_is_abandoned() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());

    let position =
        lifecycle::create_pending_open("BTC-USD", dec!(2), dec!(50000), None, None, Utc::now())
            .unwrap();
    ledger.upsert_position(&position).await.unwrap();
    let mut order = Order::new(
        position.position_id,
        "BTC-USD",
        OrderSide::Buy,
        dec!(2),
        None,
        1,
    );
    order.status = OrderStatus::Unknown;
    ledger.insert_order(&order).await.unwrap();

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::PositionClosed);
    assert!(ledger.live_position("BTC-USD").await.unwrap().is_none());
    let resolved = ledger.order_by_id(order.order_id).await.unwrap();
    assert_eq!(resolved.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn ambiguous_outcome_raises_one_anomaly() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    venue.set_mark("BTC-USD", dec!(50000)).await;
    venue
        .set_behavior("BTC-USD", VenueBehavior::SilentFillQueryFails)
        .await;

    let seq = ledger.begin_cycle(Utc::now()).await.unwrap().seq;
    let report = pipeline(ledger.clone(), venue.clone())
        .execute(seq, &buy("BTC-USD", dec!(1), dec!(50000)))
        .await
        .unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Unresolved);

    // Timeout of zero: the ambiguity is already overdue.
    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(0));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();
    assert!(corrections.is_empty());
    assert_eq!(ledger.open_anomalies().await.unwrap().len(), 1);

    // A second pass does not stack a duplicate anomaly.
    reconciler.reconcile(&ReconcileScope::Full).await.unwrap();
    assert_eq!(ledger.open_anomalies().await.unwrap().len(), 1);

    // The order stays parked and the position pending.
    assert_eq!(ledger.unresolved_orders().await.unwrap().len(), 1);
    let position = ledger.live_position("BTC-USD").await.unwrap().unwrap();
    assert!(position.status.is_pending());
}

#[tokio::test]
async fn ghost_position_is_closed_from_venue_truth() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    seed_open_position(&ledger, &venue, "ETH-USD", dec!(4), dec!(2000)).await;
    venue.set_balance("ETH-USD", dec!(0)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::PositionClosed);
    assert!(ledger.live_position("ETH-USD").await.unwrap().is_none());
}

#[tokio::test]
async fn untracked_venue_balance_is_flagged() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    venue.set_balance("SOL-USD", dec!(3)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::AnomalyFlagged);
    let anomalies = ledger.open_anomalies().await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].instrument, "SOL-USD");
}

#[tokio::test]
async fn scoped_pass_ignores_other_instruments() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    seed_open_position(&ledger, &venue, "BTC-USD", dec!(1), dec!(50000)).await;
    seed_open_position(&ledger, &venue, "ETH-USD", dec!(10), dec!(2000)).await;
    venue.drift_balance("BTC-USD", dec!(-0.2)).await;
    venue.drift_balance("ETH-USD", dec!(-1)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let scope = ReconcileScope::Instruments(vec!["ETH-USD".to_string()]);
    let corrections = reconciler.reconcile(&scope).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].instrument, "ETH-USD");
    // The out-of-scope drift is untouched.
    let btc = ledger.live_position("BTC-USD").await.unwrap().unwrap();
    assert_eq!(btc.quantity, dec!(1));
}

#[tokio::test]
async fn stale_pending_open_is_confirmed_from_the_balance() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    let mut position =
        lifecycle::create_pending_open("BTC-USD", dec!(2), dec!(50000), None, None, Utc::now())
            .unwrap();
    position.last_updated = Utc::now() - chrono::Duration::hours(1);
    ledger.upsert_position(&position).await.unwrap();
    venue.set_balance("BTC-USD", dec!(2)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::PositionOpened);
    let confirmed = ledger.live_position("BTC-USD").await.unwrap().unwrap();
    assert_eq!(confirmed.status, PositionStatus::Open);
    assert_eq!(confirmed.quantity, dec!(2));
    assert_eq!(confirmed.entry_price, dec!(50000));
}

#[tokio::test]
async fn stale_pending_close_takes_the_venue_verdict() {
    let ledger = Arc::new(MemoryLedger::new());
    let venue = Arc::new(SimulatedVenue::new());
    let mut position =
        lifecycle::create_pending_open("BTC-USD", dec!(3), dec!(50000), None, None, Utc::now())
            .unwrap();
    lifecycle::confirm_open(&mut position, dec!(3), dec!(50000), Utc::now()).unwrap();
    lifecycle::begin_close(&mut position, Utc::now()).unwrap();
    position.last_updated = Utc::now() - chrono::Duration::hours(1);
    ledger.upsert_position(&position).await.unwrap();
    venue.set_balance("BTC-USD", dec!(0)).await;

    let reconciler = Reconciler::new(ledger.clone(), venue, reconciliation(900));
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await.unwrap();

    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].action, CorrectionAction::PositionClosed);
    assert!(ledger.live_position("BTC-USD").await.unwrap().is_none());
}
