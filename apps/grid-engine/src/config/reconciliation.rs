//! Reconciliation and post-only placement configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::live::{PlacementPolicy, ReconcileParams};

/// Matching tolerances, per-tick cap and balance refresh cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Price tolerance in ticks when matching desired to venue orders.
    #[serde(default = "default_price_tolerance_ticks")]
    pub price_tolerance_ticks: u32,
    /// Quantity tolerance as a fraction of the desired remaining quantity.
    #[serde(default = "default_qty_tolerance_frac")]
    pub qty_tolerance_frac: Decimal,
    /// Cancels plus places per tick; the rest waits for the next tick.
    #[serde(default = "default_max_actions_per_tick")]
    pub max_actions_per_tick: usize,
    /// Refresh balances from the venue every N ticks (0 disables).
    #[serde(default = "default_balance_refresh_ticks")]
    pub balance_refresh_ticks: u64,
    /// Post-only placement policy.
    #[serde(default)]
    pub placement: PlacementConfig,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            price_tolerance_ticks: default_price_tolerance_ticks(),
            qty_tolerance_frac: default_qty_tolerance_frac(),
            max_actions_per_tick: default_max_actions_per_tick(),
            balance_refresh_ticks: default_balance_refresh_ticks(),
            placement: PlacementConfig::default(),
        }
    }
}

impl ReconciliationConfig {
    /// Convert to reconciliation parameters for a venue tick size.
    #[must_use]
    pub const fn to_reconcile_params(&self, tick_size: Option<Decimal>) -> ReconcileParams {
        ReconcileParams {
            price_tolerance_ticks: self.price_tolerance_ticks,
            qty_tolerance_frac: self.qty_tolerance_frac,
            max_actions_per_tick: self.max_actions_per_tick,
            tick_size,
        }
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.max_actions_per_tick == 0 {
            return Err("reconciliation.max_actions_per_tick must be at least 1".to_string());
        }
        if self.qty_tolerance_frac < Decimal::ZERO || self.qty_tolerance_frac >= Decimal::ONE {
            return Err("reconciliation.qty_tolerance_frac must be within [0, 1)".to_string());
        }
        if self.placement.max_attempts == 0 {
            return Err("reconciliation.placement.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Post-only reject handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Attempts before the order is marked rejected.
    #[serde(default = "default_placement_attempts")]
    pub max_attempts: u32,
    /// Attempts after which each retry moves one tick away from the touch.
    #[serde(default = "default_reprice_after_attempts")]
    pub reprice_after_attempts: u32,
    /// Cap on reprice ticks.
    #[serde(default = "default_max_reprice_ticks")]
    pub max_reprice_ticks: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_placement_attempts(),
            reprice_after_attempts: default_reprice_after_attempts(),
            max_reprice_ticks: default_max_reprice_ticks(),
        }
    }
}

impl PlacementConfig {
    /// Convert to the executor's placement policy.
    #[must_use]
    pub const fn to_placement_policy(&self) -> PlacementPolicy {
        PlacementPolicy {
            max_attempts: self.max_attempts,
            reprice_after_attempts: self.reprice_after_attempts,
            max_reprice_ticks: self.max_reprice_ticks,
        }
    }
}

const fn default_price_tolerance_ticks() -> u32 {
    1
}

fn default_qty_tolerance_frac() -> Decimal {
    dec!(0.01)
}

const fn default_max_actions_per_tick() -> usize {
    20
}

const fn default_balance_refresh_ticks() -> u64 {
    10
}

const fn default_placement_attempts() -> u32 {
    4
}

const fn default_reprice_after_attempts() -> u32 {
    2
}

const fn default_max_reprice_ticks() -> u32 {
    3
}
