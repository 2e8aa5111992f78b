use async_trait::async_trait;
use core_types::{MarketContext, Position, TargetAllocation};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Decision inputs unavailable: {0}")]
    Unavailable(String),

    #[error("Decision produced an invalid allocation: {0}")]
    Invalid(String),
}

/// The pluggable strategy seam: current positions and market context in,
/// desired allocation out.
///
/// The scheduler treats a failed decision as fail-closed: the cycle seals
/// as a failure and no orders are issued. A decision function must never
/// assume its previous output was fully realized; the positions it is
/// handed are the reconciled truth.
#[async_trait]
pub trait DecisionFunction: Send + Sync {
    async fn decide(
        &self,
        positions: &[Position],
        ctx: &MarketContext,
    ) -> Result<TargetAllocation, DecisionError>;
}

/// Keeps whatever is currently held. Useful as a safe default and for
/// running the engine purely as a reconciliation daemon.
#[derive(Debug, Default)]
pub struct HoldDecision;

#[async_trait]
impl DecisionFunction for HoldDecision {
    async fn decide(
        &self,
        positions: &[Position],
        _ctx: &MarketContext,
    ) -> Result<TargetAllocation, DecisionError> {
        Ok(TargetAllocation::from_positions(positions.iter()))
    }
}

/// Always returns the same allocation. A test and paper-trading utility.
#[derive(Debug, Default)]
pub struct FixedDecision {
    allocation: TargetAllocation,
}

impl FixedDecision {
    pub fn new(allocation: TargetAllocation) -> Self {
        Self { allocation }
    }
}

#[async_trait]
impl DecisionFunction for FixedDecision {
    async fn decide(
        &self,
        _positions: &[Position],
        _ctx: &MarketContext,
    ) -> Result<TargetAllocation, DecisionError> {
        Ok(self.allocation.clone())
    }
}
