//! Live mode configuration.

use std::collections::HashSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Pairs driven by the live loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// One entry per pair; each runs its own isolated loop.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<LivePairConfig>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            pairs: default_pairs(),
        }
    }
}

impl LiveConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.pairs.is_empty() {
            return Err("live.pairs must list at least one pair".to_string());
        }
        let mut seen = HashSet::new();
        for pair in &self.pairs {
            if !pair.pair.contains('/') {
                return Err(format!("live pair '{}' must look like BASE/QUOTE", pair.pair));
            }
            if !seen.insert(pair.pair.as_str()) {
                return Err(format!("live pair '{}' listed twice", pair.pair));
            }
            if pair.paper_quote < Decimal::ZERO || pair.paper_base < Decimal::ZERO {
                return Err(format!("live pair '{}' paper balances must not be negative", pair.pair));
            }
        }
        Ok(())
    }
}

/// One live pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePairConfig {
    /// Pair symbol, e.g. `ETH/USDT`.
    pub pair: String,
    /// Plan directory for this pair; defaults to `plans.dir`.
    #[serde(default)]
    pub plan_dir: Option<String>,
    /// Starting quote balance of the paper venue.
    #[serde(default = "default_paper_quote")]
    pub paper_quote: Decimal,
    /// Starting base balance of the paper venue.
    #[serde(default)]
    pub paper_base: Decimal,
}

fn default_pairs() -> Vec<LivePairConfig> {
    vec![LivePairConfig {
        pair: "ETH/USDT".to_string(),
        plan_dir: None,
        paper_quote: default_paper_quote(),
        paper_base: Decimal::ZERO,
    }]
}

fn default_paper_quote() -> Decimal {
    dec!(10000)
}
