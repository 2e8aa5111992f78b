use crate::decision::DecisionFunction;
use crate::error::EngineError;
use crate::prices::PriceSource;
use crate::run_state::SharedRunState;
use alerter::TelegramAlerter;
use chrono::Utc;
use configuration::{BusyPolicy, EngineSettings};
use core_types::{Anomaly, CycleOutcome, MarketContext, TargetAllocation};
use execution::{ExecutionOutcome, ExecutionPipeline};
use futures::future::join_all;
use ledger::LedgerStore;
use positions::PositionBook;
use reconciler::{ReconcileScope, Reconciler};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// A cloneable handle for poking the scheduler from the control API.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    in_progress: Arc<AtomicBool>,
    queued: Arc<AtomicBool>,
    on_busy: BusyPolicy,
}

impl SchedulerHandle {
    /// Requests an out-of-band cycle. While a cycle is in progress the
    /// busy policy decides: reject outright, or queue at most one trigger
    /// for the next slot. Either way a burst of triggers can never stack
    /// up a backlog of cycles.
    pub fn trigger(&self) -> Result<(), EngineError> {
        if self.in_progress.load(Ordering::SeqCst) {
            return match self.on_busy {
                BusyPolicy::Reject => Err(EngineError::CycleBusy),
                BusyPolicy::Queue => {
                    if self.queued.swap(true, Ordering::SeqCst) {
                        Err(EngineError::CycleBusy)
                    } else {
                        Ok(())
                    }
                }
            };
        }
        self.trigger_tx.try_send(()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::CycleBusy,
            mpsc::error::TrySendError::Closed(_) => EngineError::SchedulerStopped,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

/// The orchestrator: runs the evaluate-decide-execute-reconcile cycle on
/// a fixed interval and on demand.
///
/// Exclusivity is enforced twice over. In-process, an atomic flag keeps
/// cycles strictly sequential. Across processes, a durable lease in the
/// ledger makes sure two instances pointed at the same ledger can never
/// both run cycles; the loser skips its slot and retries next tick.
pub struct CycleScheduler {
    ledger: Arc<dyn LedgerStore>,
    pipeline: Arc<ExecutionPipeline>,
    reconciler: Arc<Reconciler>,
    decision: Arc<dyn DecisionFunction>,
    prices: Arc<dyn PriceSource>,
    alerter: Option<Arc<TelegramAlerter>>,
    settings: EngineSettings,
    run_state: SharedRunState,
    /// Identity written into the cycle lease, unique per process start.
    owner_id: String,
    handle: SchedulerHandle,
    trigger_rx: mpsc::Receiver<()>,
    /// Anomaly ids already pushed to the operator this run.
    alerted_anomalies: tokio::sync::Mutex<HashSet<Uuid>>,
}

impl CycleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        pipeline: Arc<ExecutionPipeline>,
        reconciler: Arc<Reconciler>,
        decision: Arc<dyn DecisionFunction>,
        prices: Arc<dyn PriceSource>,
        alerter: Option<Arc<TelegramAlerter>>,
        settings: EngineSettings,
        run_state: SharedRunState,
    ) -> (Self, SchedulerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let handle = SchedulerHandle {
            trigger_tx,
            in_progress: Arc::new(AtomicBool::new(false)),
            queued: Arc::new(AtomicBool::new(false)),
            on_busy: settings.on_busy,
        };
        let owner_id = format!("meridian-{}", uuid::Uuid::new_v4());
        let scheduler = Self {
            ledger,
            pipeline,
            reconciler,
            decision,
            prices,
            alerter,
            settings,
            run_state,
            owner_id,
            handle: handle.clone(),
            trigger_rx,
            alerted_anomalies: tokio::sync::Mutex::new(HashSet::new()),
        };
        (scheduler, handle)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Brings the instance to a runnable state: verifies the venue is
    /// reachable, then settles whatever a previous run left behind.
    pub async fn startup(&self) -> Result<(), EngineError> {
        self.reconciler
            .preflight()
            .await
            .map_err(|e| EngineError::Preflight(e.to_string()))?;

        // A cycle that never sealed means the process died mid-cycle.
        // Reconcile against the venue, then seal it as a partial failure
        // so the sequence stays gap-free and honest.
        if let Some(cycle) = self.ledger.unsealed_cycle().await? {
            tracing::warn!(
                seq = cycle.seq,
                "found unsealed cycle from a previous run; reconciling"
            );
            self.reconciler.reconcile(&ReconcileScope::Full).await?;
            self.ledger
                .seal_cycle(cycle.seq, CycleOutcome::PartialFailure)
                .await?;
        }

        {
            let mut state = self.run_state.write().await;
            state.executor_running = true;
            state.last_refreshed_at = Some(Utc::now());
        }
        if let Some(alerter) = &self.alerter {
            alerter.notify_started(&self.owner_id).await;
        }
        tracing::info!(owner_id = %self.owner_id, "engine startup complete");
        Ok(())
    }

    /// The scheduler loop. Runs until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        self.startup().await?;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.cycle_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; consume it so the first cycle
        // runs a full interval after startup reconciliation.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle_guarded().await,
                Some(()) = self.trigger_rx.recv() => self.run_cycle_guarded().await,
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            // Serve the one coalesced trigger that arrived mid-cycle.
            if self.handle.queued.swap(false, Ordering::SeqCst) {
                self.run_cycle_guarded().await;
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn run_cycle_guarded(&self) {
        if self.handle.in_progress.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = self.run_cycle().await;
        self.handle.in_progress.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            tracing::error!(error = %err, "cycle aborted");
            self.run_state.write().await.last_error = Some(err.to_string());
        }
    }

    /// One full cycle: lease, reconcile, decide, execute, reconcile, seal.
    pub async fn run_cycle(&self) -> Result<(), EngineError> {
        let lease_ttl = Duration::from_secs(self.settings.lease_ttl_secs);
        if !self.ledger.acquire_lease(&self.owner_id, lease_ttl).await? {
            tracing::warn!("cycle lease held by another instance; skipping slot");
            return Ok(());
        }

        let cycle = self.ledger.begin_cycle(Utc::now()).await?;
        tracing::info!(seq = cycle.seq, "cycle started");

        // Whatever happens inside the body, the record must not stay
        // in-progress: an aborted cycle is sealed failed and its orders
        // are left to reconciliation.
        let result = self.cycle_body(cycle.seq).await;
        if let Err(err) = &result {
            tracing::error!(seq = cycle.seq, error = %err, "cycle aborted; sealing as failed");
            if let Err(seal_err) = self.seal(cycle.seq, CycleOutcome::Failure).await {
                tracing::error!(seq = cycle.seq, error = %seal_err, "could not seal aborted cycle");
            }
        }
        result
    }

    async fn cycle_body(&self, seq: i64) -> Result<(), EngineError> {
        // Decisions must see reconciled truth, not last cycle's hopes.
        self.reconciler.reconcile(&ReconcileScope::Full).await?;
        self.alert_new_anomalies().await;

        let ctx = self.prices.snapshot().await?;
        let live = self.ledger.live_positions().await?;
        let book = PositionBook::load(live.clone())?;

        let target = match self.decision.decide(&live, &ctx).await {
            Ok(target) => target,
            Err(err) => {
                // Fail closed: a broken decision function issues no orders.
                tracing::error!(seq, error = %err, "decision function failed");
                self.seal(seq, CycleOutcome::Failure).await?;
                self.run_state.write().await.last_error = Some(err.to_string());
                return Ok(());
            }
        };
        self.ledger
            .record_decision(seq, serde_json::to_value(&target)?)
            .await?;

        let target = self.apply_risk_triggers(target, &book, &ctx);
        let dust = self.pipeline.dust_tolerance();
        let adjustments = book.diff(&target, &ctx, dust);
        if adjustments.is_empty() {
            tracing::info!(seq, "allocation already satisfied; no orders");
            self.seal(seq, CycleOutcome::Success).await?;
            self.finish_cycle(seq).await;
            return Ok(());
        }

        // Instruments are independent; execute them concurrently. Orders
        // within one instrument stay strictly sequential inside the
        // pipeline.
        let reports = join_all(
            adjustments
                .iter()
                .map(|adjustment| self.pipeline.execute(seq, adjustment)),
        )
        .await;

        let outcome = classify(&reports);
        let touched: Vec<String> = adjustments.iter().map(|a| a.instrument.clone()).collect();
        self.reconciler
            .reconcile(&ReconcileScope::Instruments(touched))
            .await?;
        self.alert_new_anomalies().await;

        self.seal(seq, outcome).await?;
        self.finish_cycle(seq).await;
        Ok(())
    }

    /// Positions whose stop or target price has been crossed are forced
    /// to a zero target, overriding whatever the decision wanted.
    fn apply_risk_triggers(
        &self,
        mut target: TargetAllocation,
        book: &PositionBook,
        ctx: &MarketContext,
    ) -> TargetAllocation {
        for instrument in book.risk_triggered(ctx) {
            tracing::warn!(instrument = %instrument, "risk trigger fired; forcing close");
            target.set(instrument, rust_decimal::Decimal::ZERO);
        }
        target
    }

    /// Pushes every anomaly the operator has not seen yet to the alerter.
    /// At most one alert per anomaly per process lifetime; a restart
    /// re-alerts whatever is still open.
    async fn alert_new_anomalies(&self) {
        let Some(alerter) = &self.alerter else {
            return;
        };
        let open = match self.ledger.open_anomalies().await {
            Ok(open) => open,
            Err(err) => {
                tracing::error!(error = %err, "could not read anomalies for alerting");
                return;
            }
        };
        let mut seen = self.alerted_anomalies.lock().await;
        for anomaly in unalerted(&mut seen, &open) {
            alerter.notify_anomaly(anomaly).await;
        }
    }

    async fn seal(&self, seq: i64, outcome: CycleOutcome) -> Result<(), EngineError> {
        self.ledger.seal_cycle(seq, outcome).await?;
        tracing::info!(seq, outcome = %outcome, "cycle sealed");
        if let Some(alerter) = &self.alerter {
            alerter.notify_cycle_outcome(seq, outcome).await;
        }
        Ok(())
    }

    async fn finish_cycle(&self, seq: i64) {
        let mut state = self.run_state.write().await;
        state.completed_cycle = Some(seq);
        state.last_refreshed_at = Some(Utc::now());
        state.last_error = None;
    }

    /// Shutdown drain: give in-flight confirmations up to the grace period
    /// to land, then leave the rest to restart-time reconciliation.
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.settings.shutdown_grace_secs);
        loop {
            match self.ledger.unresolved_orders().await {
                Ok(unresolved) if unresolved.is_empty() => break,
                Ok(unresolved) => {
                    if tokio::time::Instant::now() >= deadline {
                        tracing::warn!(
                            count = unresolved.len(),
                            "shutdown grace elapsed; unresolved orders left for restart"
                        );
                        break;
                    }
                    if let Err(err) = self.reconciler.reconcile(&ReconcileScope::Full).await {
                        tracing::warn!(error = %err, "drain reconcile failed");
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not check unresolved orders at shutdown");
                    break;
                }
            }
        }
        if let Err(err) = self.ledger.release_lease(&self.owner_id).await {
            tracing::warn!(error = %err, "failed to release cycle lease at shutdown");
        }
        self.run_state.write().await.executor_running = false;
        tracing::info!("engine shut down");
    }
}

/// Folds per-instrument execution reports into the cycle verdict.
/// Filters the open anomalies down to the ones not yet alerted, marking
/// them as seen.
fn unalerted<'a>(seen: &mut HashSet<Uuid>, open: &'a [Anomaly]) -> Vec<&'a Anomaly> {
    open.iter()
        .filter(|anomaly| seen.insert(anomaly.anomaly_id))
        .collect()
}

fn classify(
    reports: &[Result<execution::ExecutionReport, execution::ExecutionError>],
) -> CycleOutcome {
    let mut clean = 0usize;
    let mut tainted = 0usize;
    for report in reports {
        match report {
            Ok(r) => match r.outcome {
                ExecutionOutcome::Completed | ExecutionOutcome::NoAction => clean += 1,
                ExecutionOutcome::Truncated
                | ExecutionOutcome::Rejected
                | ExecutionOutcome::Unresolved => tainted += 1,
            },
            Err(err) => {
                tracing::error!(error = %err, "adjustment execution errored");
                tainted += 1;
            }
        }
    }
    if tainted == 0 {
        CycleOutcome::Success
    } else if clean > 0 {
        CycleOutcome::PartialFailure
    } else {
        CycleOutcome::Failure
    }
}
