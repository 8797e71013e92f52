//! Fill accounting and stop-out configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::default_true;

/// Fees, stop-out distance and liquidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillsConfig {
    /// Fee on notional (0.001 = 10 bps).
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Range fallback stop distance, in steps beyond the range.
    #[serde(default = "default_stop_out_range_steps")]
    pub stop_out_range_steps: Decimal,
    /// Liquidate base inventory on STOP and stop-outs.
    #[serde(default = "default_true")]
    pub flatten_on_stop: bool,
    /// Base inventory at or below this is left alone.
    #[serde(default = "default_dust_quantity")]
    pub dust_quantity: Decimal,
}

impl Default for FillsConfig {
    fn default() -> Self {
        Self {
            fee_rate: default_fee_rate(),
            stop_out_range_steps: default_stop_out_range_steps(),
            flatten_on_stop: true,
            dust_quantity: default_dust_quantity(),
        }
    }
}

impl FillsConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= dec!(0.1) {
            return Err("fills.fee_rate must be within [0, 0.1)".to_string());
        }
        if self.stop_out_range_steps < Decimal::ZERO {
            return Err("fills.stop_out_range_steps must not be negative".to_string());
        }
        if self.dust_quantity < Decimal::ZERO {
            return Err("fills.dust_quantity must not be negative".to_string());
        }
        Ok(())
    }
}

fn default_fee_rate() -> Decimal {
    dec!(0.001)
}

fn default_stop_out_range_steps() -> Decimal {
    dec!(1)
}

fn default_dust_quantity() -> Decimal {
    dec!(0.0001)
}
