//! Resting orders and fills.
//!
//! A [`RestingOrder`] is owned exclusively by the executor or simulator
//! instance of one pair. A [`Fill`] is an append-only execution record.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Stable upper-case label used in guard keys and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting, nothing filled yet.
    Open,
    /// Resting with some quantity filled.
    Partial,
    /// Fully filled (terminal).
    Filled,
    /// Canceled (terminal).
    Canceled,
    /// Rejected by the venue after retries (terminal).
    Rejected,
}

impl OrderStatus {
    /// Whether the order still rests on the book.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Open | Self::Partial)
    }
}

/// A single rung order owned by the executor or simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestingOrder {
    /// Deterministic client-side identifier.
    pub client_id: String,
    /// Order side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Target quantity.
    pub quantity: Decimal,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Position of the rung in the ladder.
    pub level_index: usize,
    /// Venue order id (live mode only, set once placed).
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    /// Current status.
    pub status: OrderStatus,
    /// Bar/tick sequence at which the order was created.
    #[serde(default)]
    pub created_seq: u64,
}

impl RestingOrder {
    /// Create a new open order.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        level_index: usize,
        created_seq: u64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            side,
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            level_index,
            exchange_order_id: None,
            status: OrderStatus::Open,
            created_seq,
        }
    }

    /// Quantity still resting.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// Quote notional of the remaining quantity.
    #[must_use]
    pub fn remaining_notional(&self) -> Decimal {
        self.remaining() * self.price
    }

    /// Apply an execution of `qty` and update the status.
    ///
    /// Returns the quantity actually applied (never more than remaining).
    pub fn apply_fill(&mut self, qty: Decimal) -> Decimal {
        let applied = qty.min(self.remaining()).max(Decimal::ZERO);
        self.filled_quantity += applied;
        self.status = if self.remaining().is_zero() {
            OrderStatus::Filled
        } else if self.filled_quantity.is_zero() {
            OrderStatus::Open
        } else {
            OrderStatus::Partial
        };
        applied
    }
}

/// Why a fill happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillReason {
    /// The whole remaining quantity executed.
    Normal,
    /// Only part of the remaining quantity executed.
    Partial,
    /// Inventory liquidated by a stop.
    StopLiquidation,
}

impl FillReason {
    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Partial => "partial",
            Self::StopLiquidation => "stop_liquidation",
        }
    }
}

/// Immutable execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Execution timestamp (epoch milliseconds).
    pub ts: i64,
    /// Side executed.
    pub side: Side,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Fee charged in quote currency.
    pub fee: Decimal,
    /// Ladder rung, absent for liquidations.
    pub level_index: Option<usize>,
    /// Client order id, absent for liquidations.
    pub client_id: Option<String>,
    /// Reason tag.
    pub reason: FillReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_opposite_and_display() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.to_string(), "BUY");
    }

    #[test]
    fn partial_then_full_fill() {
        let mut order = RestingOrder::new("o-1", Side::Buy, dec!(100), dec!(2), 0, 0);
        assert_eq!(order.apply_fill(dec!(0.5)), dec!(0.5));
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.remaining(), dec!(1.5));

        assert_eq!(order.apply_fill(dec!(5)), dec!(1.5));
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(!order.status.is_live());
    }

    #[test]
    fn status_serde_is_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Partial).unwrap();
        assert_eq!(json, "\"partial\"");
    }
}
