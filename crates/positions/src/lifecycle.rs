use crate::error::PositionError;
use chrono::{DateTime, Utc};
use core_types::{Position, PositionStatus};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Creates a `pending_open` position for an accepted opening order.
///
/// The intended signed quantity is committed up front; `confirm_open`
/// replaces it with the venue-confirmed fill.
pub fn create_pending_open(
    instrument: impl Into<String>,
    intended_qty: Decimal,
    mark: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<Position, PositionError> {
    if intended_qty.is_zero() {
        return Err(PositionError::ZeroQuantity);
    }
    Ok(Position {
        position_id: Uuid::new_v4(),
        instrument: instrument.into(),
        quantity: intended_qty,
        entry_price: mark,
        current_value: intended_qty * mark,
        opened_at: now,
        status: PositionStatus::PendingOpen,
        stop_loss,
        take_profit,
        last_updated: now,
    })
}

/// `pending_open -> open` once the venue confirms a fill. The position's
/// quantity becomes the confirmed signed fill, which may be smaller than
/// intended after an accepted partial.
pub fn confirm_open(
    position: &mut Position,
    filled_qty: Decimal,
    avg_price: Decimal,
    now: DateTime<Utc>,
) -> Result<(), PositionError> {
    if position.status != PositionStatus::PendingOpen {
        return Err(PositionError::IllegalTransition {
            from: position.status,
            to: PositionStatus::Open,
        });
    }
    if filled_qty.is_zero() {
        return Err(PositionError::ZeroQuantity);
    }
    position.quantity = filled_qty;
    position.entry_price = avg_price;
    position.current_value = filled_qty * avg_price;
    position.status = PositionStatus::Open;
    position.last_updated = now;
    Ok(())
}

/// `pending_open -> closed` when the opening order never executed: nothing
/// was ever held, so the position is archived with zero quantity.
pub fn abandon_open(position: &mut Position, now: DateTime<Utc>) -> Result<(), PositionError> {
    if position.status != PositionStatus::PendingOpen {
        return Err(PositionError::IllegalTransition {
            from: position.status,
            to: PositionStatus::Closed,
        });
    }
    position.quantity = Decimal::ZERO;
    position.current_value = Decimal::ZERO;
    position.status = PositionStatus::Closed;
    position.last_updated = now;
    Ok(())
}

/// `open -> pending_close`, reached by a target of zero or by a risk
/// trigger firing.
pub fn begin_close(position: &mut Position, now: DateTime<Utc>) -> Result<(), PositionError> {
    if position.status != PositionStatus::Open {
        return Err(PositionError::IllegalTransition {
            from: position.status,
            to: PositionStatus::PendingClose,
        });
    }
    position.status = PositionStatus::PendingClose;
    position.last_updated = now;
    Ok(())
}

/// `pending_close -> closed` when the residual signed quantity is within
/// dust tolerance. A larger residual means the close was truncated: the
/// position returns to `open` holding exactly the residual.
pub fn confirm_close(
    position: &mut Position,
    residual_qty: Decimal,
    dust_tolerance: Decimal,
    now: DateTime<Utc>,
) -> Result<(), PositionError> {
    if position.status != PositionStatus::PendingClose {
        return Err(PositionError::IllegalTransition {
            from: position.status,
            to: PositionStatus::Closed,
        });
    }
    if residual_qty.abs() <= dust_tolerance {
        position.quantity = Decimal::ZERO;
        position.current_value = Decimal::ZERO;
        position.status = PositionStatus::Closed;
    } else {
        position.quantity = residual_qty;
        position.status = PositionStatus::Open;
    }
    position.last_updated = now;
    Ok(())
}

/// Resizes an open position after an adjustment fill, maintaining the
/// weighted average entry price when exposure grows.
pub fn apply_adjustment_fill(
    position: &mut Position,
    signed_fill: Decimal,
    price: Decimal,
    now: DateTime<Utc>,
) -> Result<(), PositionError> {
    if position.status != PositionStatus::Open {
        return Err(PositionError::IllegalTransition {
            from: position.status,
            to: PositionStatus::Open,
        });
    }
    let new_qty = position.quantity + signed_fill;
    let grows_exposure = new_qty.abs() > position.quantity.abs();
    if grows_exposure && !new_qty.is_zero() {
        let existing_value = position.entry_price * position.quantity;
        let added_value = price * signed_fill;
        position.entry_price = (existing_value + added_value) / new_qty;
    }
    position.quantity = new_qty;
    position.current_value = new_qty * price;
    position.last_updated = now;
    check_invariant(position)?;
    Ok(())
}

/// Overwrites the quantity with venue-reported truth (a reconciler
/// correction). Venue-flat positions are archived.
pub fn force_quantity(position: &mut Position, venue_qty: Decimal, now: DateTime<Utc>) {
    position.quantity = venue_qty;
    if venue_qty.is_zero() {
        position.current_value = Decimal::ZERO;
        position.status = PositionStatus::Closed;
    }
    position.last_updated = now;
}

/// Quantity must be zero exactly when the position is closed.
pub fn check_invariant(position: &Position) -> Result<(), PositionError> {
    let zero = position.quantity.is_zero();
    if zero != position.status.is_closed() {
        return Err(PositionError::QuantityStatusMismatch {
            position_id: position.position_id,
            quantity: position.quantity,
            status: position.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending(qty: Decimal) -> Position {
        create_pending_open("BTC-USD", qty, dec!(50000), None, None, Utc::now()).unwrap()
    }

    #[test]
    fn full_lifecycle_holds_the_quantity_invariant() {
        let now = Utc::now();
        let mut position = pending(dec!(0.5));
        check_invariant(&position).unwrap();

        confirm_open(&mut position, dec!(0.5), dec!(50100), now).unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        check_invariant(&position).unwrap();

        begin_close(&mut position, now).unwrap();
        check_invariant(&position).unwrap();

        confirm_close(&mut position, dec!(0), dec!(0.0001), now).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.quantity, Decimal::ZERO);
        check_invariant(&position).unwrap();
    }

    #[test]
    fn residual_within_dust_closes() {
        let now = Utc::now();
        let mut position = pending(dec!(1));
        confirm_open(&mut position, dec!(1), dec!(100), now).unwrap();
        begin_close(&mut position, now).unwrap();
        confirm_close(&mut position, dec!(0.00005), dec!(0.0001), now).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
    }

    #[test]
    fn truncated_close_reopens_with_residual() {
        let now = Utc::now();
        let mut position = pending(dec!(1));
        confirm_open(&mut position, dec!(1), dec!(100), now).unwrap();
        begin_close(&mut position, now).unwrap();
        confirm_close(&mut position, dec!(0.4), dec!(0.0001), now).unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.quantity, dec!(0.4));
    }

    #[test]
    fn confirm_open_requires_pending_open() {
        let now = Utc::now();
        let mut position = pending(dec!(1));
        confirm_open(&mut position, dec!(1), dec!(100), now).unwrap();
        let err = confirm_open(&mut position, dec!(1), dec!(100), now).unwrap_err();
        assert!(matches!(err, PositionError::IllegalTransition { .. }));
    }

    #[test]
    fn growing_exposure_reweights_entry_price() {
        let now = Utc::now();
        let mut position = pending(dec!(1));
        confirm_open(&mut position, dec!(1), dec!(100), now).unwrap();
        apply_adjustment_fill(&mut position, dec!(1), dec!(200), now).unwrap();
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(position.entry_price, dec!(150));
    }

    #[test]
    fn shrinking_exposure_keeps_entry_price() {
        let now = Utc::now();
        let mut position = pending(dec!(2));
        confirm_open(&mut position, dec!(2), dec!(100), now).unwrap();
        apply_adjustment_fill(&mut position, dec!(-1), dec!(300), now).unwrap();
        assert_eq!(position.quantity, dec!(1));
        assert_eq!(position.entry_price, dec!(100));
    }

    #[test]
    fn abandoned_open_archives_cleanly() {
        let now = Utc::now();
        let mut position = pending(dec!(1));
        abandon_open(&mut position, now).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        check_invariant(&position).unwrap();
    }

    #[test]
    fn forced_flat_quantity_closes_the_position() {
        let now = Utc::now();
        let mut position = pending(dec!(1));
        confirm_open(&mut position, dec!(1), dec!(100), now).unwrap();
        force_quantity(&mut position, Decimal::ZERO, now);
        assert_eq!(position.status, PositionStatus::Closed);
        check_invariant(&position).unwrap();
    }
}
