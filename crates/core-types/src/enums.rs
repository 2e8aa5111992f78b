use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = &'static str;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err("invalid order side; expected buy|sell"),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The lifecycle of a held position.
///
/// `PendingOpen -> Open -> PendingClose -> Closed`, with `Open -> PendingClose`
/// also reachable when a stop-loss or take-profit price is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    PendingOpen,
    Open,
    PendingClose,
    Closed,
}

impl PositionStatus {
    /// True while an order for this position is awaiting confirmation.
    pub fn is_pending(&self) -> bool {
        matches!(self, PositionStatus::PendingOpen | PositionStatus::PendingClose)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PositionStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::PendingOpen => "pending_open",
            PositionStatus::Open => "open",
            PositionStatus::PendingClose => "pending_close",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = &'static str;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending_open" => Ok(PositionStatus::PendingOpen),
            "open" => Ok(PositionStatus::Open),
            "pending_close" => Ok(PositionStatus::PendingClose),
            "closed" => Ok(PositionStatus::Closed),
            _ => Err("invalid position status"),
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The lifecycle of a single venue instruction.
///
/// `Unknown` is reserved for submissions whose outcome could not be confirmed
/// (network failure, confirmation timeout). Such orders are never assumed
/// filled or lost; only reconciliation against venue truth resolves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    Unknown,
}

impl OrderStatus {
    /// Terminal states require no further tracking.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = &'static str;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "submitted" => Ok(OrderStatus::Submitted),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "rejected" => Ok(OrderStatus::Rejected),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "unknown" => Ok(OrderStatus::Unknown),
            _ => Err("invalid order status"),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a sealed execution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every adjustment reached a confirmed, accepted fill (or no action).
    Success,
    /// At least one adjustment was rejected, truncated or left unresolved.
    PartialFailure,
    /// The cycle aborted before issuing orders (decision or engine failure).
    Failure,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Success => "success",
            CycleOutcome::PartialFailure => "partial_failure",
            CycleOutcome::Failure => "failure",
        }
    }
}

impl FromStr for CycleOutcome {
    type Err = &'static str;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "success" => Ok(CycleOutcome::Success),
            "partial_failure" => Ok(CycleOutcome::PartialFailure),
            "failure" => Ok(CycleOutcome::Failure),
            _ => Err("invalid cycle outcome"),
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a ledger/venue discrepancy was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionAction {
    /// Ledger quantity overwritten with the venue-reported quantity.
    QuantityAdjusted,
    /// A pending-open position was confirmed open from venue truth.
    PositionOpened,
    /// A position was confirmed closed (or flat on the venue) and archived.
    PositionClosed,
    /// Venue truth was ambiguous; an anomaly was raised for the operator.
    AnomalyFlagged,
}

impl CorrectionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionAction::QuantityAdjusted => "quantity_adjusted",
            CorrectionAction::PositionOpened => "position_opened",
            CorrectionAction::PositionClosed => "position_closed",
            CorrectionAction::AnomalyFlagged => "anomaly_flagged",
        }
    }
}

impl fmt::Display for CorrectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionAction {
    type Err = &'static str;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "quantity_adjusted" => Ok(CorrectionAction::QuantityAdjusted),
            "position_opened" => Ok(CorrectionAction::PositionOpened),
            "position_closed" => Ok(CorrectionAction::PositionClosed),
            "anomaly_flagged" => Ok(CorrectionAction::AnomalyFlagged),
            _ => Err("invalid correction action"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn order_status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Unknown.is_terminal());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            PositionStatus::PendingOpen,
            PositionStatus::Open,
            PositionStatus::PendingClose,
            PositionStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<PositionStatus>().unwrap(), status);
        }
    }
}
