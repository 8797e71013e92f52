//! Exchange capability interface, retry policy and the paper venue.

pub mod paper;
pub mod port;
pub mod retry;

pub use paper::PaperExchange;
pub use port::{
    ExchangeBalances, ExchangeError, ExchangePort, LiveOrder, OrderAck, PlaceOrderRequest,
    TradeRecord,
};
pub use retry::{BackoffCalculator, ErrorCategory, RetryPolicy, with_retry};
