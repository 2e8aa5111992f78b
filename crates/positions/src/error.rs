use core_types::PositionStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PositionError {
    #[error("Illegal position transition from '{from}' to '{to}'")]
    IllegalTransition {
        from: PositionStatus,
        to: PositionStatus,
    },

    #[error("Instrument '{0}' already has a live position")]
    DuplicateLivePosition(String),

    #[error("Position {position_id} violates the quantity/status invariant: quantity {quantity} with status '{status}'")]
    QuantityStatusMismatch {
        position_id: uuid::Uuid,
        quantity: rust_decimal::Decimal,
        status: PositionStatus,
    },

    #[error("A position cannot be created with zero quantity")]
    ZeroQuantity,
}
