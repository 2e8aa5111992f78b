use crate::error::PositionError;
use crate::lifecycle;
use core_types::{Adjustment, MarketContext, Position, PositionStatus, TargetAllocation};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// The live positions of one engine instance, loaded from the ledger at the
/// start of a cycle.
///
/// The book is a read-model: it computes adjustments and risk triggers,
/// while the actual transitions flow back through `lifecycle` and the
/// ledger.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    /// Builds the book from ledger state, enforcing one live position per
    /// instrument and the quantity/status invariant on every entry.
    pub fn load(positions: Vec<Position>) -> Result<Self, PositionError> {
        let mut book = BTreeMap::new();
        for position in positions {
            if !position.is_live() {
                continue;
            }
            lifecycle::check_invariant(&position)?;
            if book.contains_key(&position.instrument) {
                return Err(PositionError::DuplicateLivePosition(position.instrument));
            }
            book.insert(position.instrument.clone(), position);
        }
        Ok(Self { positions: book })
    }

    pub fn get(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Diffs the target allocation against currently held open positions,
    /// producing the signed adjustments this cycle must execute.
    ///
    /// Pending positions are excluded: their outcome belongs to the
    /// reconciler, and issuing further orders against them would create
    /// concurrent writers to one position. Deltas at or below dust are
    /// suppressed as noise.
    pub fn diff(
        &self,
        target: &TargetAllocation,
        ctx: &MarketContext,
        dust_tolerance: Decimal,
    ) -> Vec<Adjustment> {
        let mut instruments: Vec<&String> = target.targets.keys().collect();
        for instrument in self.positions.keys() {
            if !target.targets.contains_key(instrument) {
                instruments.push(instrument);
            }
        }

        let mut adjustments = Vec::new();
        for instrument in instruments {
            let current = match self.positions.get(instrument) {
                Some(p) if p.status == PositionStatus::Open => p.quantity,
                Some(p) => {
                    tracing::warn!(
                        instrument = %instrument,
                        status = %p.status,
                        "skipping adjustment for pending position"
                    );
                    continue;
                }
                None => Decimal::ZERO,
            };
            let delta = target.target_for(instrument) - current;
            if delta.abs() <= dust_tolerance {
                continue;
            }
            adjustments.push(Adjustment {
                instrument: instrument.clone(),
                delta,
                reference_price: ctx.mark_for(instrument),
            });
        }
        adjustments
    }

    /// Instruments whose stop-loss or take-profit price has been crossed,
    /// evaluated once per cycle before new adjustments are computed.
    pub fn risk_triggered(&self, ctx: &MarketContext) -> Vec<String> {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .filter(|p| {
                let Some(mark) = ctx.mark_for(&p.instrument) else {
                    return false;
                };
                let long = p.quantity.is_sign_positive();
                let stop_hit = p.stop_loss.is_some_and(|stop| {
                    if long { mark <= stop } else { mark >= stop }
                });
                let profit_hit = p.take_profit.is_some_and(|take| {
                    if long { mark >= take } else { mark <= take }
                });
                stop_hit || profit_hit
            })
            .map(|p| p.instrument.clone())
            .collect()
    }
}
