//! Plan contract emitted by the external planner.
//!
//! A [`Plan`] is read-only once parsed. Structural validation runs on every
//! load; integrity (hash, sequence, duplicate id) is checked separately by
//! [`crate::domain::integrity`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allowed mismatch between `levels * step` and the range width, in steps.
const STEP_SPAN_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Errors raised while loading or validating a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan file could not be read.
    #[error("failed to read plan {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The plan JSON is malformed or missing required fields.
    #[error("failed to parse plan: {0}")]
    Parse(#[from] serde_json::Error),

    /// The plan parsed but is structurally invalid.
    #[error("invalid plan {plan_id}: {message}")]
    Invalid {
        /// Identifier of the offending plan.
        plan_id: String,
        /// What is wrong.
        message: String,
    },
}

/// Verdict carried by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanAction {
    /// Seed or maintain the ladder.
    Start,
    /// Keep whatever is resting; never seeds.
    Hold,
    /// Cancel everything and optionally flatten.
    Stop,
}

impl PlanAction {
    /// Upper-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Hold => "HOLD",
            Self::Stop => "STOP",
        }
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fill confirmation rule selected by the plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Bar low/high reaching the price fills the order.
    #[default]
    Touch,
    /// Bar must open on one side of the price and close on the other.
    Reverse,
}

/// Price band the ladder spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    /// Lowest rung.
    pub low: Decimal,
    /// Highest rung.
    pub high: Decimal,
}

/// Ladder geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of steps between low and high (rungs = levels + 1).
    pub levels: u32,
    /// Explicit step; derived from the range when absent.
    #[serde(default)]
    pub step: Option<Decimal>,
    /// Optional per-rung weights, `levels + 1` entries.
    #[serde(default)]
    pub weights: Option<Vec<Decimal>>,
    /// Fill confirmation rule.
    #[serde(default)]
    pub fill_mode: FillMode,
    /// Bars a rung stays cold after it fills.
    #[serde(default)]
    pub cooldown_bars: u32,
}

/// Explicit exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSpec {
    /// Close at or above this price stops the ladder.
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Close at or below this price stops the ladder.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
}

/// Capital policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalPolicy {
    /// Share of free quote balance the buy side may commit, in (0, 1].
    pub budget_fraction: Decimal,
}

/// Fill detection settings; a change re-arms the cooldown guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillSettings {
    /// Confirmation rule.
    pub mode: FillMode,
    /// Cooldown length in bars.
    pub cooldown_bars: u32,
}

fn default_schema_version() -> u32 {
    1
}

/// Versioned decision artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Contract version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Unique identifier.
    pub plan_id: String,
    /// Trading pair, e.g. `ETH/USDT`.
    pub pair: String,
    /// Strictly increasing per pair.
    pub decision_seq: u64,
    /// Hex SHA-256 over the material fields.
    pub plan_hash: String,
    /// Planner wall-clock timestamp.
    pub generated_at: DateTime<Utc>,
    /// First candle (epoch ms) the plan applies to.
    pub valid_for_candle_ts: i64,
    /// Plan this one replaces, if any.
    #[serde(default)]
    pub supersedes_plan_id: Option<String>,
    /// Planner materiality bucket.
    pub materiality_class: String,
    /// Raw verdict.
    pub action: PlanAction,
    /// Reason attached to a STOP verdict.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Ladder range.
    pub range: PriceRange,
    /// Ladder geometry.
    pub grid: GridSpec,
    /// Explicit exits.
    #[serde(default)]
    pub risk: RiskSpec,
    /// Capital policy.
    pub capital: CapitalPolicy,
}

impl Plan {
    /// Parse and structurally validate a plan from JSON text.
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        let plan: Self = serde_json::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read, parse and validate a plan file.
    pub fn from_path(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Structural checks that do not depend on execution state.
    pub fn validate(&self) -> Result<(), PlanError> {
        let invalid = |message: String| PlanError::Invalid {
            plan_id: self.plan_id.clone(),
            message,
        };

        if self.plan_id.trim().is_empty() {
            return Err(invalid("plan_id must not be empty".to_string()));
        }
        if self.pair.trim().is_empty() {
            return Err(invalid("pair must not be empty".to_string()));
        }
        if self.range.low <= Decimal::ZERO || self.range.low >= self.range.high {
            return Err(invalid(format!(
                "range must satisfy 0 < low < high, got [{}, {}]",
                self.range.low, self.range.high
            )));
        }
        if self.grid.levels == 0 {
            return Err(invalid("grid.levels must be >= 1".to_string()));
        }
        if let Some(step) = self.grid.step {
            if step <= Decimal::ZERO {
                return Err(invalid(format!("grid.step must be positive, got {step}")));
            }
            let span = step * Decimal::from(self.grid.levels);
            let width = self.range.high - self.range.low;
            if (span - width).abs() > step * STEP_SPAN_TOLERANCE {
                return Err(invalid(format!(
                    "grid.step {step} x {} levels spans {span}, range spans {width}",
                    self.grid.levels
                )));
            }
        }
        let fraction = self.capital.budget_fraction;
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(invalid(format!(
                "capital.budget_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if let Some(weights) = &self.grid.weights {
            let expected = self.grid.levels as usize + 1;
            if weights.len() != expected {
                return Err(invalid(format!(
                    "grid.weights must have {expected} entries, got {}",
                    weights.len()
                )));
            }
            if weights.iter().any(|w| w.is_sign_negative() && !w.is_zero()) {
                return Err(invalid("grid.weights must be >= 0".to_string()));
            }
            if weights.iter().all(|w| w.is_zero()) {
                return Err(invalid("grid.weights must not be all zero".to_string()));
            }
        }
        if let (Some(tp), Some(sl)) = (self.risk.take_profit, self.risk.stop_loss) {
            if sl >= tp {
                return Err(invalid(format!(
                    "risk.stop_loss ({sl}) must be below risk.take_profit ({tp})"
                )));
            }
        }
        Ok(())
    }

    /// Step between rungs: explicit `grid.step` or `(high - low) / levels`.
    #[must_use]
    pub fn resolved_step(&self) -> Decimal {
        self.grid
            .step
            .unwrap_or_else(|| (self.range.high - self.range.low) / Decimal::from(self.grid.levels))
    }

    /// Fill detection settings carried by the plan.
    #[must_use]
    pub const fn fill_settings(&self) -> FillSettings {
        FillSettings {
            mode: self.grid.fill_mode,
            cooldown_bars: self.grid.cooldown_bars,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::plan;
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"{
        "plan_id": "p-1",
        "pair": "ETH/USDT",
        "decision_seq": 7,
        "plan_hash": "abc",
        "generated_at": "2025-01-01T00:00:00Z",
        "valid_for_candle_ts": 1735689600000,
        "materiality_class": "material",
        "action": "START",
        "range": {"low": "100", "high": "110"},
        "grid": {"levels": 4},
        "capital": {"budget_fraction": "0.5"}
    }"#;

    #[test]
    fn test_parse_minimal_plan_defaults() {
        let plan = Plan::from_json(MINIMAL).unwrap();
        assert_eq!(plan.schema_version, 1);
        assert_eq!(plan.action, PlanAction::Start);
        assert_eq!(plan.grid.fill_mode, FillMode::Touch);
        assert_eq!(plan.grid.cooldown_bars, 0);
        assert!(plan.risk.take_profit.is_none());
        assert_eq!(plan.resolved_step(), dec!(2.5));
    }

    #[test]
    fn test_missing_required_field_is_parse_error() {
        let text = MINIMAL.replace(r#""decision_seq": 7,"#, "");
        let Err(err) = Plan::from_json(&text) else {
            panic!("missing decision_seq must fail");
        };
        assert!(matches!(err, PlanError::Parse(_)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut p = plan("p", 1, PlanAction::Start);
        p.range.low = dec!(120);
        assert!(matches!(p.validate(), Err(PlanError::Invalid { .. })));
    }

    #[test]
    fn test_weight_length_must_match_rungs() {
        let mut p = plan("p", 1, PlanAction::Start);
        p.grid.weights = Some(vec![dec!(1); 4]);
        assert!(p.validate().is_err());
        p.grid.weights = Some(vec![dec!(1); 5]);
        assert!(p.validate().is_ok());
        p.grid.weights = Some(vec![dec!(0); 5]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_budget_fraction_bounds() {
        let mut p = plan("p", 1, PlanAction::Start);
        p.capital.budget_fraction = dec!(0);
        assert!(p.validate().is_err());
        p.capital.budget_fraction = dec!(1.5);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_explicit_step_wins() {
        let mut p = plan("p", 1, PlanAction::Start);
        p.grid.levels = 5;
        p.grid.step = Some(dec!(2));
        assert!(p.validate().is_ok());
        assert_eq!(p.resolved_step(), dec!(2));
    }

    #[test]
    fn test_step_must_span_range() {
        let mut p = plan("p", 1, PlanAction::Start);
        p.grid.step = Some(dec!(5));
        let Err(err) = p.validate() else {
            panic!("rungs past range.high must be rejected");
        };
        assert!(err.to_string().contains("grid.step"));

        p.grid.step = Some(dec!(2.5));
        assert!(p.validate().is_ok());

        // 10 / 3 rounded by the planner still lands within the tolerance.
        p.grid.levels = 3;
        p.grid.step = Some(dec!(3.3333));
        assert!(p.validate().is_ok());
    }
}
