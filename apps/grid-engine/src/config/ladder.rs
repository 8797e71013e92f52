//! Ladder sizing configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::ladder::LadderParams;

/// Ladder sizing and venue precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Cap on resting orders per side; rungs nearest the price win.
    #[serde(default = "default_max_orders_per_side")]
    pub max_orders_per_side: usize,
    /// Venue price tick. Rungs snap to it when set.
    #[serde(default)]
    pub tick_size: Option<Decimal>,
    /// Venue quantity step; quantities round down to it.
    #[serde(default = "default_qty_step")]
    pub qty_step: Decimal,
    /// Smallest order notional in quote.
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,
    /// Lower clamp for plan weights.
    #[serde(default = "default_weight_min")]
    pub weight_min: Decimal,
    /// Upper clamp for plan weights.
    #[serde(default = "default_weight_max")]
    pub weight_max: Decimal,
    /// Largest rung shift, in steps, still treated as a soft adjust.
    #[serde(default = "default_soft_adjust_tolerance_steps")]
    pub soft_adjust_tolerance_steps: Decimal,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            max_orders_per_side: default_max_orders_per_side(),
            tick_size: None,
            qty_step: default_qty_step(),
            min_notional: default_min_notional(),
            weight_min: default_weight_min(),
            weight_max: default_weight_max(),
            soft_adjust_tolerance_steps: default_soft_adjust_tolerance_steps(),
        }
    }
}

impl LadderConfig {
    /// Convert to the builder's parameters.
    #[must_use]
    pub const fn to_ladder_params(&self) -> LadderParams {
        LadderParams {
            max_orders_per_side: self.max_orders_per_side,
            tick_size: self.tick_size,
            qty_step: self.qty_step,
            min_notional: self.min_notional,
            weight_min: self.weight_min,
            weight_max: self.weight_max,
        }
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.max_orders_per_side == 0 {
            return Err("ladder.max_orders_per_side must be at least 1".to_string());
        }
        if self.qty_step <= Decimal::ZERO {
            return Err("ladder.qty_step must be positive".to_string());
        }
        if self.tick_size.is_some_and(|t| t <= Decimal::ZERO) {
            return Err("ladder.tick_size must be positive when set".to_string());
        }
        if self.min_notional < Decimal::ZERO {
            return Err("ladder.min_notional must not be negative".to_string());
        }
        if self.weight_min <= Decimal::ZERO || self.weight_min > self.weight_max {
            return Err("ladder weights must satisfy 0 < weight_min <= weight_max".to_string());
        }
        if self.soft_adjust_tolerance_steps < Decimal::ZERO {
            return Err("ladder.soft_adjust_tolerance_steps must not be negative".to_string());
        }
        Ok(())
    }
}

const fn default_max_orders_per_side() -> usize {
    20
}

fn default_qty_step() -> Decimal {
    dec!(0.0001)
}

fn default_min_notional() -> Decimal {
    dec!(5)
}

fn default_weight_min() -> Decimal {
    dec!(0.1)
}

fn default_weight_max() -> Decimal {
    dec!(10)
}

fn default_soft_adjust_tolerance_steps() -> Decimal {
    dec!(0.5)
}
