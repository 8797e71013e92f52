//! Fill detection against price bars.
//!
//! Orders of each side are kept sorted by price and the touched range is
//! found with a binary search, so a bar costs `O(log n + k)` per side for
//! `k` filled orders.
//!
//! # Confirmation modes
//!
//! | Mode | Buy at `p` | Sell at `p` |
//! |------|-----------|-------------|
//! | Touch | `low <= p` | `high >= p` |
//! | Reverse | `open > p >= close` | `open < p <= close` |

use std::collections::BTreeMap;
use std::ops::Range;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{RestingOrder, Side};
use super::plan::{FillMode, FillSettings, Plan};

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// One OHLC price bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Open time (epoch milliseconds).
    pub ts: i64,
    /// Open.
    pub open: Decimal,
    /// High.
    pub high: Decimal,
    /// Low.
    pub low: Decimal,
    /// Close.
    pub close: Decimal,
    /// Volume, when the source has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
}

impl Bar {
    /// Degenerate bar at a single price, used for live ticks.
    #[must_use]
    pub const fn flat(ts: i64, price: Decimal) -> Self {
        Self {
            ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: None,
        }
    }

    /// Bar with every price scaled by `factor`.
    #[must_use]
    fn scaled(&self, factor: Decimal) -> Self {
        Self {
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
            ..*self
        }
    }

    /// The bar as seen by one side after a spread shock of `shift_bps`.
    ///
    /// Buys see prices pushed up and sells see them pushed down, so the
    /// shock always works against the resting order.
    #[must_use]
    pub fn shocked_for(&self, side: Side, shift_bps: Decimal) -> Self {
        if shift_bps.is_zero() {
            return *self;
        }
        let shift = shift_bps / BPS;
        match side {
            Side::Buy => self.scaled(Decimal::ONE + shift),
            Side::Sell => self.scaled(Decimal::ONE - shift),
        }
    }
}

/// Cooldown guard keyed by `(side, level)`.
///
/// Remembers the bar sequence of each rung's last fill and the fill settings
/// the memory was built under. New settings wipe the memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownGuard {
    /// Settings the guard is armed with.
    #[serde(default)]
    pub settings: Option<FillSettings>,
    /// `"SIDE:level"` to last fill sequence.
    #[serde(default)]
    pub last_fill: BTreeMap<String, u64>,
}

impl CooldownGuard {
    fn key(side: Side, level: usize) -> String {
        format!("{side}:{level}")
    }

    /// Arm with new settings. Returns `true` if the memory was reset.
    pub fn rearm(&mut self, settings: FillSettings) -> bool {
        if self.settings == Some(settings) {
            return false;
        }
        self.settings = Some(settings);
        self.last_fill.clear();
        true
    }

    /// Confirmation mode currently armed.
    #[must_use]
    pub fn mode(&self) -> FillMode {
        self.settings.map(|s| s.mode).unwrap_or_default()
    }

    /// Whether the rung filled within the last `cooldown_bars` bars.
    #[must_use]
    pub fn is_cooling(&self, side: Side, level: usize, seq: u64) -> bool {
        let cooldown = self.settings.map_or(0, |s| u64::from(s.cooldown_bars));
        if cooldown == 0 {
            return false;
        }
        self.last_fill
            .get(&Self::key(side, level))
            .is_some_and(|last| seq.saturating_sub(*last) <= cooldown)
    }

    /// Record a fill at `seq`.
    pub fn record(&mut self, side: Side, level: usize, seq: u64) {
        self.last_fill.insert(Self::key(side, level), seq);
    }
}

/// Indices into `sorted_prices` (ascending) that the bar fills for a side.
#[must_use]
pub fn touched_range(sorted_prices: &[Decimal], side: Side, mode: FillMode, bar: &Bar) -> Range<usize> {
    let len = sorted_prices.len();
    match (side, mode) {
        (Side::Buy, FillMode::Touch) => sorted_prices.partition_point(|p| *p < bar.low)..len,
        (Side::Sell, FillMode::Touch) => 0..sorted_prices.partition_point(|p| *p <= bar.high),
        (Side::Buy, FillMode::Reverse) => {
            if bar.close >= bar.open {
                return 0..0;
            }
            sorted_prices.partition_point(|p| *p < bar.close)
                ..sorted_prices.partition_point(|p| *p < bar.open)
        }
        (Side::Sell, FillMode::Reverse) => {
            if bar.close <= bar.open {
                return 0..0;
            }
            sorted_prices.partition_point(|p| *p <= bar.open)
                ..sorted_prices.partition_point(|p| *p <= bar.close)
        }
    }
}

/// Indices of orders the bar fills.
///
/// Only live orders created before `seq` and not cooling are eligible.
/// Buys come first, highest price first; then sells, lowest price first.
#[must_use]
pub fn detect_fills(
    orders: &[RestingOrder],
    bar: &Bar,
    seq: u64,
    guard: &CooldownGuard,
    shift_bps: Decimal,
) -> Vec<usize> {
    let mode = guard.mode();
    let mut hits = Vec::new();
    for side in [Side::Buy, Side::Sell] {
        let mut book: Vec<(Decimal, usize)> = orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.side == side && o.status.is_live() && o.created_seq < seq)
            .map(|(i, o)| (o.price, i))
            .collect();
        book.sort();
        let prices: Vec<Decimal> = book.iter().map(|(p, _)| *p).collect();
        let view = bar.shocked_for(side, shift_bps);
        let range = touched_range(&prices, side, mode, &view);
        let mut touched: Vec<usize> = book[range]
            .iter()
            .map(|(_, i)| *i)
            .filter(|&i| !guard.is_cooling(side, orders[i].level_index, seq))
            .collect();
        if side == Side::Buy {
            touched.reverse();
        }
        hits.extend(touched);
    }
    hits
}

/// Rung that receives the opposite order after a fill.
///
/// A buy at `i` hands off to a sell at `i + 1`; a sell at `i` to a buy at
/// `i - 1`. `None` at the ladder edges.
#[must_use]
pub fn opposite_level(side: Side, level: usize, rung_count: usize) -> Option<usize> {
    match side {
        Side::Buy => Some(level + 1).filter(|&l| l < rung_count),
        Side::Sell => level.checked_sub(1),
    }
}

/// Why a stop-out fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    /// Close at or above the take-profit.
    TakeProfit,
    /// Close at or below the stop-loss.
    StopLoss,
    /// Close above the range by more than the allowed steps.
    RangeBreakout,
    /// Close below the range by more than the allowed steps.
    RangeBreakdown,
}

impl StopTrigger {
    /// Snake-case reason code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
            Self::RangeBreakout => "range_breakout",
            Self::RangeBreakdown => "range_breakdown",
        }
    }
}

/// Exit levels of the active plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitLevels {
    /// Range low.
    pub low: Decimal,
    /// Range high.
    pub high: Decimal,
    /// Rung step.
    pub step: Decimal,
    /// Explicit take-profit.
    pub take_profit: Option<Decimal>,
    /// Explicit stop-loss.
    pub stop_loss: Option<Decimal>,
}

impl ExitLevels {
    /// Exit levels of a plan.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            low: plan.range.low,
            high: plan.range.high,
            step: plan.resolved_step(),
            take_profit: plan.risk.take_profit,
            stop_loss: plan.risk.stop_loss,
        }
    }

    /// Check the close against the exits.
    ///
    /// Explicit levels take precedence; the range fallback only applies when
    /// the plan carries neither.
    #[must_use]
    pub fn check(&self, close: Decimal, range_steps: Decimal) -> Option<StopTrigger> {
        if self.take_profit.is_some() || self.stop_loss.is_some() {
            if self.stop_loss.is_some_and(|sl| close <= sl) {
                return Some(StopTrigger::StopLoss);
            }
            if self.take_profit.is_some_and(|tp| close >= tp) {
                return Some(StopTrigger::TakeProfit);
            }
            return None;
        }
        let margin = self.step * range_steps;
        if close < self.low - margin {
            Some(StopTrigger::RangeBreakdown)
        } else if close > self.high + margin {
            Some(StopTrigger::RangeBreakout)
        } else {
            None
        }
    }
}
