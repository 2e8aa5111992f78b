use crate::error::ExecutionError;
use core_types::{Adjustment, OrderSide};
use rust_decimal::Decimal;

/// One venue submission a routed adjustment decomposes into. Quantities are
/// unsigned; direction lives in `side`.
#[derive(Debug, Clone)]
pub struct OrderLeg {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Decomposes an adjustment into the venue orders that realize it.
///
/// Most instruments route directly to a single order, but a synthetic
/// instrument may require several legs. The pipeline treats a multi-leg
/// route as all-or-nothing: if any leg fails, the completed legs are
/// unwound with compensating orders.
pub trait OrderRouter: Send + Sync {
    fn route(&self, adjustment: &Adjustment) -> Result<Vec<OrderLeg>, ExecutionError>;
}

/// The default one-adjustment-one-order router.
#[derive(Debug, Default)]
pub struct DirectRouter;

impl OrderRouter for DirectRouter {
    fn route(&self, adjustment: &Adjustment) -> Result<Vec<OrderLeg>, ExecutionError> {
        if adjustment.delta.is_zero() {
            return Ok(Vec::new());
        }
        Ok(vec![OrderLeg {
            instrument: adjustment.instrument.clone(),
            side: adjustment.side(),
            quantity: adjustment.delta.abs(),
            limit_price: adjustment.reference_price,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn direct_router_emits_one_unsigned_leg() {
        let adjustment = Adjustment {
            instrument: "BTC-USD".to_string(),
            delta: dec!(-0.5),
            reference_price: Some(dec!(50000)),
        };
        let legs = DirectRouter.route(&adjustment).unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].side, OrderSide::Sell);
        assert_eq!(legs[0].quantity, dec!(0.5));
        assert_eq!(legs[0].limit_price, Some(dec!(50000)));
    }

    #[test]
    fn zero_delta_routes_to_nothing() {
        let adjustment = Adjustment {
            instrument: "BTC-USD".to_string(),
            delta: Decimal::ZERO,
            reference_price: None,
        };
        assert!(DirectRouter.route(&adjustment).unwrap().is_empty());
    }
}
