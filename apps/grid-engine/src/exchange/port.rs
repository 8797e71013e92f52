//! Exchange Port (Driven Port)
//!
//! Opaque capability interface the live executor uses to reach a venue.
//! Concrete venue bindings live outside this crate; [`super::PaperExchange`]
//! is the in-process implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::retry::ErrorCategory;
use crate::domain::order::Side;

/// Request to place a limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Pair.
    pub pair: String,
    /// Client order id.
    pub client_order_id: String,
    /// Side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Quantity.
    pub quantity: Decimal,
    /// Reject instead of taking liquidity.
    pub post_only: bool,
}

impl PlaceOrderRequest {
    /// Post-only limit order.
    #[must_use]
    pub fn post_only(
        pair: impl Into<String>,
        client_order_id: impl Into<String>,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            pair: pair.into(),
            client_order_id: client_order_id.into(),
            side,
            price,
            quantity,
            post_only: true,
        }
    }

    /// Marketable limit order (liquidations).
    #[must_use]
    pub const fn taker(mut self) -> Self {
        self.post_only = false;
        self
    }
}

/// Acknowledgment after placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Venue order id.
    pub exchange_order_id: String,
    /// Client order id echoed back.
    pub client_order_id: String,
}

/// An order resting at the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOrder {
    /// Venue order id.
    pub exchange_order_id: String,
    /// Client order id, when the venue echoes it.
    #[serde(default)]
    pub client_order_id: Option<String>,
    /// Side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Remaining quantity.
    pub quantity: Decimal,
}

/// Venue balances for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeBalances {
    /// Total quote, including amounts locked in orders.
    pub quote_total: Decimal,
    /// Total base, including amounts locked in orders.
    pub base_total: Decimal,
}

/// A venue execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Venue trade id, monotonically ordered.
    pub trade_id: String,
    /// Venue order id.
    pub exchange_order_id: String,
    /// Side.
    pub side: Side,
    /// Price.
    pub price: Decimal,
    /// Quantity.
    pub quantity: Decimal,
    /// Fee in quote.
    pub fee: Decimal,
    /// Time (epoch milliseconds).
    pub ts: i64,
}

/// Exchange port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// Transport failure or timeout.
    #[error("Exchange connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Post-only order would have crossed the book.
    #[error("Post-only order rejected: {reason}")]
    PostOnlyRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Order rejected for another reason.
    #[error("Order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Order not found.
    #[error("Order not found: {order_id}")]
    OrderNotFound {
        /// The missing order id.
        order_id: String,
    },

    /// Insufficient balance.
    #[error("Insufficient balance")]
    InsufficientFunds,

    /// Rate limited.
    #[error("Rate limited by exchange")]
    RateLimited,

    /// No price available.
    #[error("No market price for {pair}")]
    NoPrice {
        /// Pair.
        pair: String,
    },
}

impl ExchangeError {
    /// Retry category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } | Self::NoPrice { .. } => ErrorCategory::Retryable,
            Self::RateLimited => ErrorCategory::RateLimited,
            Self::PostOnlyRejected { .. } => ErrorCategory::PostOnlyReject,
            Self::OrderRejected { .. } | Self::OrderNotFound { .. } | Self::InsufficientFunds => {
                ErrorCategory::NonRetryable
            }
        }
    }
}

/// Port for venue interactions.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Place a limit order.
    async fn place_limit(&self, request: PlaceOrderRequest) -> Result<OrderAck, ExchangeError>;

    /// Cancel an order by venue id.
    async fn cancel(&self, pair: &str, exchange_order_id: &str) -> Result<(), ExchangeError>;

    /// Orders currently resting for a pair.
    async fn fetch_open_orders(&self, pair: &str) -> Result<Vec<LiveOrder>, ExchangeError>;

    /// Balances for a pair's two assets.
    async fn fetch_balances(&self, pair: &str) -> Result<ExchangeBalances, ExchangeError>;

    /// Trades after `since_trade_id` (all known trades when `None`), oldest first.
    async fn fetch_recent_trades(
        &self,
        pair: &str,
        since_trade_id: Option<&str>,
    ) -> Result<Vec<TradeRecord>, ExchangeError>;

    /// Last traded price.
    async fn fetch_last_price(&self, pair: &str) -> Result<Decimal, ExchangeError>;
}
