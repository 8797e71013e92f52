//! In-process paper exchange.
//!
//! Implements [`ExchangePort`] for a single pair without any network. Orders
//! rest until a bar pushed with [`PaperExchange::push_bar`] touches them,
//! using the same touched-range search as the replay fill path. Failures
//! can be scripted for tests: connection errors, post-only rejects and
//! failing cancels.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use super::port::{
    ExchangeBalances, ExchangeError, ExchangePort, LiveOrder, OrderAck, PlaceOrderRequest,
    TradeRecord,
};
use crate::domain::fills::{Bar, touched_range};
use crate::domain::order::Side;
use crate::domain::plan::FillMode;

#[derive(Debug)]
struct Book {
    last_price: Option<Decimal>,
    clock_ms: i64,
    quote_total: Decimal,
    base_total: Decimal,
    open: BTreeMap<String, LiveOrder>,
    trades: Vec<TradeRecord>,
    next_order: u64,
    failing_calls: u32,
    post_only_rejects: u32,
    failing_cancels: u32,
}

impl Book {
    fn reserved(&self) -> (Decimal, Decimal) {
        self.open.values().fold((Decimal::ZERO, Decimal::ZERO), |(q, b), o| match o.side {
            Side::Buy => (q + o.price * o.quantity, b),
            Side::Sell => (q, b + o.quantity),
        })
    }

    fn take_failure(&mut self) -> Result<(), ExchangeError> {
        if self.failing_calls > 0 {
            self.failing_calls -= 1;
            return Err(ExchangeError::Connection {
                message: "paper exchange: scripted timeout".to_string(),
            });
        }
        Ok(())
    }

    fn execute(&mut self, order: &LiveOrder, price: Decimal, fee_rate: Decimal) {
        let notional = order.quantity * price;
        let fee = notional * fee_rate;
        match order.side {
            Side::Buy => {
                self.quote_total -= notional + fee;
                self.base_total += order.quantity;
            }
            Side::Sell => {
                self.base_total -= order.quantity;
                self.quote_total += notional - fee;
            }
        }
        let trade_id = format!("paper-t-{:010}", self.trades.len() + 1);
        self.trades.push(TradeRecord {
            trade_id,
            exchange_order_id: order.exchange_order_id.clone(),
            side: order.side,
            price,
            quantity: order.quantity,
            fee,
            ts: self.clock_ms,
        });
    }
}

/// Paper exchange for one pair.
#[derive(Debug)]
pub struct PaperExchange {
    pair: String,
    fee_rate: Decimal,
    book: Mutex<Book>,
}

impl PaperExchange {
    /// Paper venue holding the given balances.
    #[must_use]
    pub fn new(pair: impl Into<String>, quote: Decimal, base: Decimal, fee_rate: Decimal) -> Self {
        Self {
            pair: pair.into(),
            fee_rate,
            book: Mutex::new(Book {
                last_price: None,
                clock_ms: 0,
                quote_total: quote,
                base_total: base,
                open: BTreeMap::new(),
                trades: Vec::new(),
                next_order: 0,
                failing_calls: 0,
                post_only_rejects: 0,
                failing_cancels: 0,
            }),
        }
    }

    /// Set the last traded price.
    pub async fn set_price(&self, price: Decimal) {
        self.book.lock().await.last_price = Some(price);
    }

    /// Fill every order the bar touches at its limit price, then move the
    /// last price to the close. Returns the number of trades.
    pub async fn push_bar(&self, bar: &Bar) -> usize {
        let mut book = self.book.lock().await;
        book.clock_ms = bar.ts;
        let mut filled = Vec::new();
        for side in [Side::Buy, Side::Sell] {
            let mut resting: Vec<(Decimal, String)> = book
                .open
                .values()
                .filter(|o| o.side == side)
                .map(|o| (o.price, o.exchange_order_id.clone()))
                .collect();
            resting.sort();
            let prices: Vec<Decimal> = resting.iter().map(|(p, _)| *p).collect();
            let range = touched_range(&prices, side, FillMode::Touch, bar);
            filled.extend(resting[range].iter().map(|(_, id)| id.clone()));
        }
        for id in &filled {
            if let Some(order) = book.open.remove(id) {
                book.execute(&order, order.price, self.fee_rate);
            }
        }
        book.last_price = Some(bar.close);
        debug!(pair = %self.pair, trades = filled.len(), close = %bar.close, "paper bar");
        filled.len()
    }

    /// Fail the next `n` calls with a connection error.
    pub async fn fail_next_calls(&self, n: u32) {
        self.book.lock().await.failing_calls = n;
    }

    /// Reject the next `n` post-only placements.
    pub async fn reject_post_only(&self, n: u32) {
        self.book.lock().await.post_only_rejects = n;
    }

    /// Fail the next `n` cancels with a connection error.
    pub async fn fail_cancels(&self, n: u32) {
        self.book.lock().await.failing_cancels = n;
    }

    /// Number of resting orders.
    pub async fn open_order_count(&self) -> usize {
        self.book.lock().await.open.len()
    }

    fn check_pair(&self, pair: &str) -> Result<(), ExchangeError> {
        if pair == self.pair {
            Ok(())
        } else {
            Err(ExchangeError::OrderRejected {
                reason: format!("unknown pair {pair}"),
            })
        }
    }
}

#[async_trait]
impl ExchangePort for PaperExchange {
    async fn place_limit(&self, request: PlaceOrderRequest) -> Result<OrderAck, ExchangeError> {
        self.check_pair(&request.pair)?;
        let mut book = self.book.lock().await;
        book.take_failure()?;

        let last = book.last_price;
        if request.post_only {
            if book.post_only_rejects > 0 {
                book.post_only_rejects -= 1;
                return Err(ExchangeError::PostOnlyRejected {
                    reason: "scripted reject".to_string(),
                });
            }
            let crosses = last.is_some_and(|p| match request.side {
                Side::Buy => request.price >= p,
                Side::Sell => request.price <= p,
            });
            if crosses {
                return Err(ExchangeError::PostOnlyRejected {
                    reason: "order would take liquidity".to_string(),
                });
            }
        }

        let (quote_reserved, base_reserved) = book.reserved();
        let affordable = match request.side {
            Side::Buy => book.quote_total - quote_reserved >= request.price * request.quantity,
            Side::Sell => book.base_total - base_reserved >= request.quantity,
        };
        if !affordable {
            return Err(ExchangeError::InsufficientFunds);
        }

        book.next_order += 1;
        let order = LiveOrder {
            exchange_order_id: format!("paper-o-{:08}", book.next_order),
            client_order_id: Some(request.client_order_id.clone()),
            side: request.side,
            price: request.price,
            quantity: request.quantity,
        };
        let ack = OrderAck {
            exchange_order_id: order.exchange_order_id.clone(),
            client_order_id: request.client_order_id,
        };

        let marketable = last.filter(|&p| match order.side {
            Side::Buy => order.price >= p,
            Side::Sell => order.price <= p,
        });
        if let Some(price) = marketable {
            book.execute(&order, price, self.fee_rate);
        } else {
            book.open.insert(order.exchange_order_id.clone(), order);
        }
        Ok(ack)
    }

    async fn cancel(&self, pair: &str, exchange_order_id: &str) -> Result<(), ExchangeError> {
        self.check_pair(pair)?;
        let mut book = self.book.lock().await;
        book.take_failure()?;
        if book.failing_cancels > 0 {
            book.failing_cancels -= 1;
            return Err(ExchangeError::Connection {
                message: "paper exchange: cancel timed out".to_string(),
            });
        }
        book.open
            .remove(exchange_order_id)
            .map(|_| ())
            .ok_or_else(|| ExchangeError::OrderNotFound {
                order_id: exchange_order_id.to_string(),
            })
    }

    async fn fetch_open_orders(&self, pair: &str) -> Result<Vec<LiveOrder>, ExchangeError> {
        self.check_pair(pair)?;
        let mut book = self.book.lock().await;
        book.take_failure()?;
        Ok(book.open.values().cloned().collect())
    }

    async fn fetch_balances(&self, pair: &str) -> Result<ExchangeBalances, ExchangeError> {
        self.check_pair(pair)?;
        let mut book = self.book.lock().await;
        book.take_failure()?;
        Ok(ExchangeBalances {
            quote_total: book.quote_total,
            base_total: book.base_total,
        })
    }

    async fn fetch_recent_trades(
        &self,
        pair: &str,
        since_trade_id: Option<&str>,
    ) -> Result<Vec<TradeRecord>, ExchangeError> {
        self.check_pair(pair)?;
        let mut book = self.book.lock().await;
        book.take_failure()?;
        let start = since_trade_id
            .and_then(|id| book.trades.iter().position(|t| t.trade_id == id))
            .map_or(0, |i| i + 1);
        Ok(book.trades[start..].to_vec())
    }

    async fn fetch_last_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        self.check_pair(pair)?;
        let mut book = self.book.lock().await;
        book.take_failure()?;
        book.last_price.ok_or_else(|| ExchangeError::NoPrice {
            pair: pair.to_string(),
        })
    }
}
