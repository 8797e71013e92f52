//! Replay mode configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Inputs and outputs of a replay run. Paths may be overridden from the
/// environment by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Pair to simulate.
    #[serde(default = "default_pair")]
    pub pair: String,
    /// Starting quote balance.
    #[serde(default = "default_initial_quote")]
    pub initial_quote: Decimal,
    /// Starting base balance.
    #[serde(default)]
    pub initial_base: Decimal,
    /// Price history file.
    #[serde(default)]
    pub bars_path: Option<String>,
    /// Chaos profile file; no chaos when absent.
    #[serde(default)]
    pub chaos_profile: Option<String>,
    /// Where the result is written.
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            pair: default_pair(),
            initial_quote: default_initial_quote(),
            initial_base: Decimal::ZERO,
            bars_path: None,
            chaos_profile: None,
            output_path: default_output_path(),
        }
    }
}

impl ReplayConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if !self.pair.contains('/') {
            return Err(format!("replay.pair '{}' must look like BASE/QUOTE", self.pair));
        }
        if self.initial_quote < Decimal::ZERO || self.initial_base < Decimal::ZERO {
            return Err("replay starting balances must not be negative".to_string());
        }
        Ok(())
    }
}

fn default_pair() -> String {
    "ETH/USDT".to_string()
}

fn default_initial_quote() -> Decimal {
    dec!(10000)
}

fn default_output_path() -> String {
    "./data/replay/result.json".to_string()
}
