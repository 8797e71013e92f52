//! Per-pair execution state.
//!
//! [`ExecutionState`] is the only durable record of a pair: balances, the
//! resting ladder, plan bookkeeping, suppression flags and fill-guard
//! counters. The live executor persists it after every tick through
//! [`StateStore`]; the replay simulator keeps it in memory.

mod store;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::fills::{CooldownGuard, ExitLevels};
use crate::domain::integrity::PlanLedger;
use crate::domain::order::{RestingOrder, Side};
use crate::domain::plan::PlanAction;
use crate::domain::signature::LadderSignature;
use crate::domain::suppression::{EffectiveRecord, PairPhase};

pub use store::{PersistenceError, StateStore, write_json_atomic};

/// Quote/base balances with reservations implied by resting orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Total quote.
    pub quote_total: Decimal,
    /// Total base.
    pub base_total: Decimal,
    /// Quote locked by resting buys.
    pub quote_reserved: Decimal,
    /// Base locked by resting sells.
    pub base_reserved: Decimal,
    /// `quote_total - quote_reserved`.
    pub quote_free: Decimal,
    /// `base_total - base_reserved`.
    pub base_free: Decimal,
}

impl Balances {
    /// Balances with nothing reserved.
    #[must_use]
    pub const fn new(quote_total: Decimal, base_total: Decimal) -> Self {
        Self {
            quote_total,
            base_total,
            quote_reserved: Decimal::ZERO,
            base_reserved: Decimal::ZERO,
            quote_free: quote_total,
            base_free: base_total,
        }
    }
}

/// An exit in flight: cancels issued, liquidation possibly outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingExit {
    /// Stop reason.
    pub reason: String,
    /// Price when the exit started.
    pub reference_price: Decimal,
    /// Base quantity still to liquidate.
    pub flatten_quantity: Decimal,
    /// Venue id of the liquidation order, once placed.
    #[serde(default)]
    pub flatten_order_id: Option<String>,
    /// When the exit started (epoch milliseconds).
    pub started_ts: i64,
}

/// Durable per-pair state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Pair.
    pub pair: String,
    /// Balances.
    pub balances: Balances,
    /// Resting orders (open or partial).
    #[serde(default)]
    pub orders: Vec<RestingOrder>,
    /// Rung prices of the active ladder.
    #[serde(default)]
    pub rungs: Vec<Decimal>,
    /// Plan bookkeeping.
    #[serde(default)]
    pub ledger: PlanLedger,
    /// Raw action of the last accepted plan.
    #[serde(default)]
    pub last_raw_action: Option<PlanAction>,
    /// Effective action of the last accepted plan.
    #[serde(default)]
    pub last_effective_action: Option<PlanAction>,
    /// Reason the last plan was suppressed, if it was.
    #[serde(default)]
    pub suppression_reason: Option<String>,
    /// Last effective tuple for STOP de-duplication.
    #[serde(default)]
    pub last_effective: Option<EffectiveRecord>,
    /// Signature of the last accepted plan.
    #[serde(default)]
    pub signature: Option<LadderSignature>,
    /// Exit levels watched each bar.
    #[serde(default)]
    pub exits: Option<ExitLevels>,
    /// Cooldown guard.
    #[serde(default)]
    pub fill_guard: CooldownGuard,
    /// Bar (replay) or tick (live) sequence.
    #[serde(default)]
    pub bar_seq: u64,
    /// Counter behind client order ids.
    #[serde(default)]
    pub order_seq: u64,
    /// Reason of the last stop.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Active pause conditions.
    #[serde(default)]
    pub pause_reasons: Vec<String>,
    /// Exit in flight.
    #[serde(default)]
    pub pending_exit: Option<PendingExit>,
    /// Last venue trade ingested.
    #[serde(default)]
    pub last_trade_id: Option<String>,
    /// Post-only reject times inside the burst window (epoch milliseconds).
    #[serde(default)]
    pub recent_rejects: VecDeque<i64>,
    /// Fees paid so far, in quote.
    #[serde(default)]
    pub fees_paid: Decimal,
    /// Last commit time (live only).
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Fresh state with the given balances.
    #[must_use]
    pub fn new(pair: impl Into<String>, quote: Decimal, base: Decimal) -> Self {
        Self {
            pair: pair.into(),
            balances: Balances::new(quote, base),
            orders: Vec::new(),
            rungs: Vec::new(),
            ledger: PlanLedger::default(),
            last_raw_action: None,
            last_effective_action: None,
            suppression_reason: None,
            last_effective: None,
            signature: None,
            exits: None,
            fill_guard: CooldownGuard::default(),
            bar_seq: 0,
            order_seq: 0,
            stop_reason: None,
            pause_reasons: Vec::new(),
            pending_exit: None,
            last_trade_id: None,
            recent_rejects: VecDeque::new(),
            fees_paid: Decimal::ZERO,
            updated_at: None,
        }
    }

    /// Whether any order rests.
    #[must_use]
    pub fn has_active_orders(&self) -> bool {
        self.orders.iter().any(|o| o.status.is_live())
    }

    /// Idle or active.
    #[must_use]
    pub fn phase(&self) -> PairPhase {
        if self.has_active_orders() {
            PairPhase::Active
        } else {
            PairPhase::Idle
        }
    }

    /// Whether a pause condition is active.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        !self.pause_reasons.is_empty()
    }

    /// Next deterministic client order id.
    pub fn next_client_id(&mut self) -> String {
        self.order_seq += 1;
        let prefix: String = self
            .pair
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{prefix}-{:06}", self.order_seq)
    }

    /// Drop filled, canceled and rejected orders.
    pub fn prune_terminal_orders(&mut self) {
        self.orders.retain(|o| o.status.is_live());
    }

    /// Recompute reserved and free amounts from the live orders.
    pub fn recompute_reserved(&mut self) {
        let (mut quote, mut base) = (Decimal::ZERO, Decimal::ZERO);
        for order in self.orders.iter().filter(|o| o.status.is_live()) {
            match order.side {
                Side::Buy => quote += order.remaining_notional(),
                Side::Sell => base += order.remaining(),
            }
        }
        let b = &mut self.balances;
        b.quote_reserved = quote;
        b.base_reserved = base;
        b.quote_free = (b.quote_total - quote).max(Decimal::ZERO);
        b.base_free = (b.base_total - base).max(Decimal::ZERO);
    }

    /// Reserved amounts never exceed totals.
    #[must_use]
    pub fn reservations_within_totals(&self) -> bool {
        self.balances.quote_reserved <= self.balances.quote_total
            && self.balances.base_reserved <= self.balances.base_total
    }

    /// Mark-to-market equity in quote.
    #[must_use]
    pub fn equity(&self, price: Decimal) -> Decimal {
        self.balances.quote_total + self.balances.base_total * price
    }

    /// Record a post-only reject and drop entries older than `window_ms`.
    pub fn record_reject(&mut self, ts: i64, window_ms: i64) -> usize {
        self.recent_rejects.push_back(ts);
        self.prune_rejects(ts, window_ms)
    }

    /// Drop rejects older than `window_ms` and return how many remain.
    pub fn prune_rejects(&mut self, now: i64, window_ms: i64) -> usize {
        while self
            .recent_rejects
            .front()
            .is_some_and(|&t| now.saturating_sub(t) > window_ms)
        {
            self.recent_rejects.pop_front();
        }
        self.recent_rejects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserved_tracks_live_orders() {
        let mut state = ExecutionState::new("ETH/USDT", dec!(1000), dec!(2));
        state
            .orders
            .push(RestingOrder::new("a", Side::Buy, dec!(100), dec!(3), 0, 0));
        state
            .orders
            .push(RestingOrder::new("b", Side::Sell, dec!(110), dec!(1.5), 4, 0));
        let mut filled = RestingOrder::new("c", Side::Buy, dec!(90), dec!(1), 1, 0);
        filled.apply_fill(dec!(1));
        state.orders.push(filled);

        state.recompute_reserved();
        state.prune_terminal_orders();
        assert_eq!(state.orders.len(), 2);
        assert_eq!(state.balances.quote_reserved, dec!(300));
        assert_eq!(state.balances.quote_free, dec!(700));
        assert_eq!(state.balances.base_reserved, dec!(1.5));
        assert_eq!(state.balances.base_free, dec!(0.5));
        assert!(state.reservations_within_totals());
        assert_eq!(state.phase(), PairPhase::Active);
    }

    #[test]
    fn test_client_ids_are_sequential_and_sanitized() {
        let mut state = ExecutionState::new("ETH/USDT", dec!(0), dec!(0));
        assert_eq!(state.next_client_id(), "ETH_USDT-000001");
        assert_eq!(state.next_client_id(), "ETH_USDT-000002");
    }

    #[test]
    fn test_reject_window_prunes_old_entries() {
        let mut state = ExecutionState::new("ETH/USDT", dec!(0), dec!(0));
        state.record_reject(1_000, 5_000);
        state.record_reject(3_000, 5_000);
        assert_eq!(state.record_reject(7_000, 5_000), 2);
        assert_eq!(state.prune_rejects(20_000, 5_000), 0);
    }
}
