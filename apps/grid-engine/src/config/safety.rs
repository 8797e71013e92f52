//! Reject-burst and exit failsafe configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::live::SafetyParams;

/// Safety thresholds for the live executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Trailing window for counting rejects, in milliseconds.
    #[serde(default = "default_reject_window_ms")]
    pub reject_window_ms: i64,
    /// Rejects inside the window that pause new ladders.
    #[serde(default = "default_reject_burst_threshold")]
    pub reject_burst_threshold: usize,
    /// Price move since the exit started that forces the failsafe
    /// (0.05 = 5%).
    #[serde(default = "default_failsafe_price_jump_pct")]
    pub failsafe_price_jump_pct: Decimal,
    /// Liquidation limit distance below the last price, in bps.
    #[serde(default = "default_flatten_slippage_bps")]
    pub flatten_slippage_bps: Decimal,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            reject_window_ms: default_reject_window_ms(),
            reject_burst_threshold: default_reject_burst_threshold(),
            failsafe_price_jump_pct: default_failsafe_price_jump_pct(),
            flatten_slippage_bps: default_flatten_slippage_bps(),
        }
    }
}

impl SafetyConfig {
    /// Convert to the executor's safety parameters.
    #[must_use]
    pub const fn to_safety_params(&self) -> SafetyParams {
        SafetyParams {
            reject_window_ms: self.reject_window_ms,
            reject_burst_threshold: self.reject_burst_threshold,
            failsafe_price_jump_pct: self.failsafe_price_jump_pct,
        }
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.reject_window_ms <= 0 {
            return Err("safety.reject_window_ms must be positive".to_string());
        }
        if self.reject_burst_threshold == 0 {
            return Err("safety.reject_burst_threshold must be at least 1".to_string());
        }
        if self.failsafe_price_jump_pct <= Decimal::ZERO {
            return Err("safety.failsafe_price_jump_pct must be positive".to_string());
        }
        if self.flatten_slippage_bps < Decimal::ZERO || self.flatten_slippage_bps >= dec!(10000) {
            return Err("safety.flatten_slippage_bps must be within [0, 10000)".to_string());
        }
        Ok(())
    }
}

const fn default_reject_window_ms() -> i64 {
    60_000
}

const fn default_reject_burst_threshold() -> usize {
    5
}

fn default_failsafe_price_jump_pct() -> Decimal {
    dec!(0.05)
}

fn default_flatten_slippage_bps() -> Decimal {
    dec!(50)
}
