//! Per-pair live executor.
//!
//! One [`PairExecutor`] owns the state of one pair. Each [`tick`] works on a
//! copy of the committed state and swaps it in only after the snapshot has
//! been written, so a tick that fails (or is dropped on shutdown) leaves
//! both memory and disk at the previous commit.
//!
//! # Tick order
//!
//! ```text
//! last price ─► open orders ─► trades ─► balances (every N ticks)
//!      │
//!      ▼
//! burst window ─► plan ─► stop-out ─► flatten ─► reconcile ─► exit check ─► commit
//! ```
//!
//! Open orders are fetched before trades: an order missing from the open
//! list has all of its trades in the following trade fetch.
//!
//! [`tick`]: PairExecutor::tick

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::reconcile::{self, ReconcileParams};
use super::safety::{self, BurstChange, ExitStatus, RejectBurstDetector, SafetyParams};
use crate::domain::core::{self, CoreParams, Execution, PlanOutcome, StopOut};
use crate::domain::events::{EngineEvent, EventKind, EventLog};
use crate::domain::ladder::floor_to_step;
use crate::domain::order::{Fill, OrderStatus, Side};
use crate::domain::plan::Plan;
use crate::error::EngineError;
use crate::exchange::{
    BackoffCalculator, ExchangeError, ExchangePort, LiveOrder, PlaceOrderRequest, RetryPolicy,
    TradeRecord, with_retry,
};
use crate::state::{ExecutionState, StateStore};

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Post-only placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPolicy {
    /// Post-only attempts before the order is marked rejected.
    pub max_attempts: u32,
    /// Attempts after which each retry moves one tick away from the touch.
    pub reprice_after_attempts: u32,
    /// Cap on reprice ticks.
    pub max_reprice_ticks: u32,
}

/// Everything a [`PairExecutor`] needs besides the venue and the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    /// Decision core parameters.
    pub core: CoreParams,
    /// Reconciliation tolerances and cap.
    pub reconcile: ReconcileParams,
    /// Retry policy for venue calls.
    pub retry: RetryPolicy,
    /// Post-only placement policy.
    pub placement: PlacementPolicy,
    /// Safety thresholds.
    pub safety: SafetyParams,
    /// Refresh balances from the venue every N ticks (0 disables).
    pub balance_refresh_ticks: u64,
    /// Liquidation limit distance below the last price, in basis points.
    pub flatten_slippage_bps: Decimal,
}

/// Input for one tick.
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// New plan observed since the last tick.
    pub plan: Option<Plan>,
    /// Tick time.
    pub now: DateTime<Utc>,
    /// Plan file seen but unreadable.
    pub input_error: Option<String>,
}

/// What a committed tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Last price the tick ran at.
    pub price: Decimal,
    /// Outcome of the plan, when one was supplied.
    pub plan: Option<PlanOutcome>,
    /// Stop-out, if one fired.
    pub stop_out: Option<StopOut>,
    /// Executions ingested.
    pub fills: Vec<Fill>,
    /// Orders placed.
    pub placed: usize,
    /// Venue orders canceled.
    pub canceled: usize,
    /// Orders given up after post-only retries.
    pub rejected: usize,
    /// Actions left for the next tick.
    pub deferred: usize,
    /// Events emitted during the tick.
    pub events: Vec<EngineEvent>,
}

/// Live executor for one pair.
pub struct PairExecutor<E: ExchangePort> {
    venue: Arc<E>,
    store: StateStore,
    settings: ExecutorSettings,
    burst: RejectBurstDetector,
    state: ExecutionState,
}

impl<E: ExchangePort> std::fmt::Debug for PairExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairExecutor")
            .field("pair", &self.state.pair)
            .field("bar_seq", &self.state.bar_seq)
            .finish_non_exhaustive()
    }
}

impl<E: ExchangePort> PairExecutor<E> {
    /// Restore the pair from its snapshot, or start fresh from venue
    /// balances when there is none.
    pub async fn recover(
        pair: &str,
        venue: Arc<E>,
        store: StateStore,
        settings: ExecutorSettings,
    ) -> Result<Self, EngineError> {
        let state = if let Some(state) = store.load(pair)? {
            info!(
                pair,
                orders = state.orders.len(),
                last_seq = ?state.ledger.last_seq(),
                bar_seq = state.bar_seq,
                "Restored execution state"
            );
            state
        } else {
            let balances = with_retry(&settings.retry, "fetch_balances", || venue.fetch_balances(pair))
                .await
                .map_err(|e| EngineError::venue("fetch_balances", e))?;
            let state = ExecutionState::new(pair, balances.quote_total, balances.base_total);
            store.save(&state)?;
            info!(pair, quote = %balances.quote_total, base = %balances.base_total, "Initialized execution state");
            state
        };
        Ok(Self {
            venue,
            store,
            burst: RejectBurstDetector::new(&settings.safety),
            settings,
            state,
        })
    }

    /// Pair handled by this executor.
    #[must_use]
    pub fn pair(&self) -> &str {
        &self.state.pair
    }

    /// Last committed state.
    #[must_use]
    pub const fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Run one tick and commit it.
    ///
    /// On error nothing is committed; the events already emitted remain in
    /// the logs only.
    pub async fn tick(&mut self, input: TickInput) -> Result<TickReport, EngineError> {
        let now = input.now.timestamp_millis();
        let pair = self.state.pair.clone();
        let mut work = self.state.clone();
        let mut events = EventLog::new(pair.clone());
        let mut report = TickReport::default();
        work.bar_seq += 1;
        if let Some(message) = input.input_error.clone() {
            events.emit(now, EventKind::ExecPlanInputError { message });
        }

        let price = self
            .fetch(&mut events, now, "fetch_last_price", || self.venue.fetch_last_price(&pair))
            .await?;
        report.price = price;

        let live = self
            .fetch(&mut events, now, "fetch_open_orders", || self.venue.fetch_open_orders(&pair))
            .await?;

        let since = work.last_trade_id.clone();
        let trades = self
            .fetch(&mut events, now, "fetch_recent_trades", || {
                self.venue.fetch_recent_trades(&pair, since.as_deref())
            })
            .await?;
        for trade in &trades {
            if let Some(fill) = self.ingest_trade(&mut work, trade, &mut events) {
                report.fills.push(fill);
            }
        }
        work.prune_terminal_orders();
        release_missing_flatten(&mut work, &live);

        let refresh = self.settings.balance_refresh_ticks;
        if refresh > 0 && (work.bar_seq - 1) % refresh == 0 {
            let balances = self
                .fetch(&mut events, now, "fetch_balances", || self.venue.fetch_balances(&pair))
                .await?;
            work.balances.quote_total = balances.quote_total;
            work.balances.base_total = balances.base_total;
            work.recompute_reserved();
        }

        self.observe_burst(&mut work, now, &mut events);

        if let Some(plan) = input.plan.as_ref() {
            report.plan = Some(core::apply_plan(
                &mut work,
                plan,
                price,
                now,
                &self.settings.core,
                &mut events,
            ));
        }
        report.stop_out = core::check_stop_out(&mut work, price, now, &self.settings.core, &mut events);

        self.place_flatten(&mut work, price, now, &mut events).await;
        let open_after = self
            .reconcile(&mut work, live, now, &mut events, &mut report)
            .await;
        self.observe_burst(&mut work, now, &mut events);
        self.settle_exit(&mut work, open_after, price, now, &mut events);

        work.prune_terminal_orders();
        work.recompute_reserved();
        work.updated_at = Some(input.now);
        self.store.save(&work)?;
        self.state = work;

        debug!(
            pair = %pair,
            bar_seq = self.state.bar_seq,
            price = %price,
            fills = report.fills.len(),
            placed = report.placed,
            canceled = report.canceled,
            "Tick committed"
        );
        report.events = events.into_events();
        Ok(report)
    }

    async fn fetch<T, F, Fut>(
        &self,
        events: &mut EventLog,
        now: i64,
        operation: &'static str,
        op: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        with_retry(&self.settings.retry, operation, op)
            .await
            .map_err(|err| {
                events.emit(
                    now,
                    EventKind::ExecVenueError {
                        operation: operation.to_string(),
                        message: err.to_string(),
                    },
                );
                EngineError::venue(operation, err)
            })
    }

    fn ingest_trade(
        &self,
        work: &mut ExecutionState,
        trade: &TradeRecord,
        events: &mut EventLog,
    ) -> Option<Fill> {
        work.last_trade_id = Some(trade.trade_id.clone());
        let execution = Execution {
            quantity: trade.quantity,
            price: trade.price,
            fee: Some(trade.fee),
            ts: trade.ts,
        };
        let flatten_id = work
            .pending_exit
            .as_ref()
            .and_then(|e| e.flatten_order_id.as_deref());
        if flatten_id == Some(trade.exchange_order_id.as_str()) {
            return core::settle_liquidation(work, execution, &self.settings.core, events);
        }
        let Some(index) = work
            .orders
            .iter()
            .position(|o| o.exchange_order_id.as_deref() == Some(trade.exchange_order_id.as_str()))
        else {
            debug!(
                pair = %work.pair,
                trade_id = %trade.trade_id,
                order_id = %trade.exchange_order_id,
                "Trade for untracked order"
            );
            return None;
        };
        core::apply_fill(work, index, execution, &self.settings.core, events)
    }

    fn observe_burst(&self, work: &mut ExecutionState, now: i64, events: &mut EventLog) {
        match self.burst.observe(work, now) {
            BurstChange::Raised(rejects) => {
                events.emit(now, EventKind::ExecRejectBurstPause { rejects });
            }
            BurstChange::Cleared => events.emit(now, EventKind::ExecRejectBurstCleared),
            BurstChange::Unchanged => {}
        }
    }

    async fn place_flatten(
        &self,
        work: &mut ExecutionState,
        price: Decimal,
        now: i64,
        events: &mut EventLog,
    ) {
        let core = &self.settings.core;
        let Some(exit) = work.pending_exit.as_ref() else {
            return;
        };
        if exit.flatten_order_id.is_some() {
            return;
        }
        let quantity = floor_to_step(
            exit.flatten_quantity.min(work.balances.base_total),
            core.ladder.qty_step,
        );
        if quantity <= core.dust_quantity {
            return;
        }
        let reason = exit.reason.clone();
        let limit = price * (Decimal::ONE - self.settings.flatten_slippage_bps / BPS);
        let client_id = work.next_client_id();
        let request =
            PlaceOrderRequest::post_only(work.pair.clone(), client_id, Side::Sell, limit, quantity).taker();
        match with_retry(&self.settings.retry, "place_flatten", || {
            self.venue.place_limit(request.clone())
        })
        .await
        {
            Ok(ack) => {
                if let Some(exit) = work.pending_exit.as_mut() {
                    exit.flatten_order_id = Some(ack.exchange_order_id);
                }
                info!(pair = %work.pair, %quantity, %limit, %reason, "Liquidation order placed");
            }
            Err(err) => events.emit(
                now,
                EventKind::ExecVenueError {
                    operation: "place_flatten".to_string(),
                    message: err.to_string(),
                },
            ),
        }
    }

    /// Converge the venue on the desired book. Returns how many venue
    /// orders are still open afterwards.
    async fn reconcile(
        &self,
        work: &mut ExecutionState,
        live: Vec<LiveOrder>,
        now: i64,
        events: &mut EventLog,
        report: &mut TickReport,
    ) -> usize {
        let flatten_id = work
            .pending_exit
            .as_ref()
            .and_then(|e| e.flatten_order_id.clone());
        let venue_orders: Vec<LiveOrder> = live
            .into_iter()
            .filter(|o| flatten_id.as_deref() != Some(o.exchange_order_id.as_str()))
            .collect();

        let seq = work.bar_seq;
        let actions = reconcile::plan_actions(&work.orders, &venue_orders, &self.settings.reconcile, |i| {
            let order = &work.orders[i];
            !work.fill_guard.is_cooling(order.side, order.level_index, seq)
        });

        for (index, exchange_order_id) in actions.matched {
            work.orders[index].exchange_order_id = Some(exchange_order_id);
        }

        for exchange_order_id in &actions.cancels {
            let result = with_retry(&self.settings.retry, "cancel", || {
                self.venue.cancel(&work.pair, exchange_order_id)
            })
            .await;
            match result {
                Ok(()) | Err(ExchangeError::OrderNotFound { .. }) => report.canceled += 1,
                Err(err) => events.emit(
                    now,
                    EventKind::ExecVenueError {
                        operation: "cancel".to_string(),
                        message: err.to_string(),
                    },
                ),
            }
        }

        for &index in &actions.places {
            if self.place_order(work, index, now, events).await {
                report.placed += 1;
            } else {
                report.rejected += 1;
            }
        }

        if actions.deferred > 0 {
            report.deferred = actions.deferred;
            events.emit(
                now,
                EventKind::ExecReconcileDeferred {
                    deferred: actions.deferred,
                },
            );
        }

        let flatten_open = work
            .pending_exit
            .as_ref()
            .is_some_and(|e| e.flatten_order_id.is_some());
        venue_orders.len() - report.canceled + report.placed + usize::from(flatten_open)
    }

    /// Place one desired order post-only, repricing away from the touch
    /// after repeated rejects. Returns `false` once the order is given up.
    async fn place_order(
        &self,
        work: &mut ExecutionState,
        index: usize,
        now: i64,
        events: &mut EventLog,
    ) -> bool {
        let policy = self.settings.placement;
        let tick = self.settings.core.ladder.tick_size;
        let order = &work.orders[index];
        let (side, quantity, client_id) = (order.side, order.remaining(), order.client_id.clone());
        let mut price = order.price;
        let mut backoff = BackoffCalculator::new(&self.settings.retry);
        let mut attempts = 0;
        let mut reprices = 0;

        let message = loop {
            attempts += 1;
            let request = PlaceOrderRequest::post_only(work.pair.clone(), client_id.clone(), side, price, quantity);
            let result = with_retry(&self.settings.retry, "place_limit", || {
                self.venue.place_limit(request.clone())
            })
            .await;
            match result {
                Ok(ack) => {
                    let order = &mut work.orders[index];
                    order.exchange_order_id = Some(ack.exchange_order_id);
                    order.price = price;
                    return true;
                }
                Err(ExchangeError::PostOnlyRejected { reason }) => {
                    let window = self.burst.record(work, now);
                    debug!(pair = %work.pair, %client_id, attempts, %price, window, %reason, "Post-only reject");
                    if attempts >= policy.max_attempts {
                        break reason;
                    }
                    if attempts >= policy.reprice_after_attempts && reprices < policy.max_reprice_ticks {
                        if let Some(tick) = tick {
                            price = match side {
                                Side::Buy => price - tick,
                                Side::Sell => price + tick,
                            };
                            reprices += 1;
                        }
                    }
                    if let Some(delay) = backoff.next_backoff() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => break err.to_string(),
            }
        };

        warn!(pair = %work.pair, %client_id, attempts, %message, "Order given up");
        work.orders[index].status = OrderStatus::Rejected;
        events.emit(
            now,
            EventKind::ExecOrderRejected {
                client_id,
                attempts,
                message,
            },
        );
        false
    }

    fn settle_exit(
        &self,
        work: &mut ExecutionState,
        open_after: usize,
        price: Decimal,
        now: i64,
        events: &mut EventLog,
    ) {
        let Some(exit) = work.pending_exit.clone() else {
            return;
        };
        match safety::evaluate_exit(
            &exit,
            open_after,
            price,
            self.settings.core.dust_quantity,
            &self.settings.safety,
        ) {
            ExitStatus::Confirmed => {
                work.pending_exit = None;
                events.emit(now, EventKind::ExecExitConfirmed { reason: exit.reason });
            }
            ExitStatus::Failsafe { price_move } => {
                let reason = safety::failsafe_reason(&exit.reason);
                work.stop_reason = Some(reason.clone());
                work.pending_exit = None;
                events.emit(now, EventKind::ExecExitFailsafe { reason, price_move });
            }
            ExitStatus::Pending => {}
        }
    }
}

/// Forget a liquidation order that is no longer open; its trades were
/// ingested this tick, so any remainder can be placed again.
fn release_missing_flatten(work: &mut ExecutionState, live: &[LiveOrder]) {
    if let Some(exit) = work.pending_exit.as_mut() {
        let missing = exit
            .flatten_order_id
            .as_deref()
            .is_some_and(|id| !live.iter().any(|o| o.exchange_order_id == id));
        if missing {
            exit.flatten_order_id = None;
        }
    }
}
