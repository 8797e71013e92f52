//! Plan fingerprinting and integrity verification.
//!
//! The hash covers only the decision-bearing fields of a plan so that two
//! plans with equal hashes describe the same decision, regardless of ids,
//! timestamps or sequence numbers.
//!
//! # Canonical form
//!
//! | Rule | Example |
//! |------|---------|
//! | Keys sorted lexicographically | `{"action":..,"capital":..}` |
//! | Compact separators | no whitespace |
//! | Decimals normalized | `"1.50"` → `"1.5"` |
//! | Absent optionals | `null` |

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::plan::Plan;

/// Identifiers of the most recently applied plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPlan {
    /// Plan id.
    pub plan_id: String,
    /// Sequence number.
    pub decision_seq: u64,
    /// Verified hash.
    pub plan_hash: String,
}

/// Per-pair memory of what has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLedger {
    /// Last accepted plan.
    pub last_applied: Option<AppliedPlan>,
    /// Recently accepted plan ids, oldest first.
    #[serde(default)]
    pub seen_plan_ids: VecDeque<String>,
}

impl PlanLedger {
    /// Whether a plan id was accepted before.
    #[must_use]
    pub fn has_seen(&self, plan_id: &str) -> bool {
        self.seen_plan_ids.iter().any(|id| id == plan_id)
    }

    /// Record an accepted plan, keeping at most `history` ids.
    pub fn record(&mut self, plan: &Plan, history: usize) {
        self.last_applied = Some(AppliedPlan {
            plan_id: plan.plan_id.clone(),
            decision_seq: plan.decision_seq,
            plan_hash: plan.plan_hash.clone(),
        });
        self.seen_plan_ids.push_back(plan.plan_id.clone());
        while self.seen_plan_ids.len() > history.max(1) {
            self.seen_plan_ids.pop_front();
        }
    }

    /// Sequence of the last accepted plan.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        self.last_applied.as_ref().map(|a| a.decision_seq)
    }
}

/// Outcome of verifying a plan against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanVerdict {
    /// Plan may be applied.
    Accept,
    /// Same plan id accepted before.
    DuplicateIgnored,
    /// Sequence number not newer than the last applied one.
    StaleSeqIgnored {
        /// Last applied sequence.
        last_seq: u64,
    },
    /// Recomputed hash differs from the provided one.
    HashMismatch {
        /// Recomputed hash.
        expected: String,
        /// Hash carried by the plan.
        actual: String,
    },
}

impl PlanVerdict {
    /// Whether the plan may be applied.
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// Short label for summaries and histograms.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Accept => "accepted",
            Self::DuplicateIgnored => "duplicate_ignored",
            Self::StaleSeqIgnored { .. } => "stale_seq_ignored",
            Self::HashMismatch { .. } => "hash_mismatch",
        }
    }
}

/// Check duplicate id, then staleness, then hash.
#[must_use]
pub fn verify(plan: &Plan, ledger: &PlanLedger) -> PlanVerdict {
    if ledger.has_seen(&plan.plan_id) {
        return PlanVerdict::DuplicateIgnored;
    }
    if let Some(last_seq) = ledger.last_seq() {
        if plan.decision_seq <= last_seq {
            return PlanVerdict::StaleSeqIgnored { last_seq };
        }
    }
    let expected = plan_hash(plan);
    if !expected.eq_ignore_ascii_case(plan.plan_hash.trim()) {
        return PlanVerdict::HashMismatch {
            expected,
            actual: plan.plan_hash.clone(),
        };
    }
    PlanVerdict::Accept
}

/// Hex SHA-256 over the canonical material subset.
#[must_use]
pub fn plan_hash(plan: &Plan) -> String {
    let canonical = canonical_material_json(plan);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Compact, key-sorted JSON of the fields that define the decision.
#[must_use]
pub fn canonical_material_json(plan: &Plan) -> String {
    let material = json!({
        "action": plan.action.as_str(),
        "capital": {
            "budget_fraction": dec(plan.capital.budget_fraction),
        },
        "grid": {
            "cooldown_bars": plan.grid.cooldown_bars,
            "fill_mode": plan.grid.fill_mode,
            "levels": plan.grid.levels,
            "step": opt_dec(plan.grid.step),
            "weights": plan
                .grid
                .weights
                .as_ref()
                .map(|ws| ws.iter().copied().map(dec).collect::<Vec<_>>()),
        },
        "materiality_class": plan.materiality_class,
        "pair": plan.pair,
        "range": {
            "high": dec(plan.range.high),
            "low": dec(plan.range.low),
        },
        "risk": {
            "stop_loss": opt_dec(plan.risk.stop_loss),
            "take_profit": opt_dec(plan.risk.take_profit),
        },
        "stop_reason": plan.stop_reason,
    });
    // Keys are listed in sorted order at every level so the output is sorted
    // whether or not serde_json preserves insertion order.
    material.to_string()
}

fn dec(value: Decimal) -> Value {
    Value::String(value.normalize().to_string())
}

fn opt_dec(value: Option<Decimal>) -> Value {
    value.map_or(Value::Null, dec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::PlanAction;
    use crate::domain::plan::fixtures::{plan, rehash};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_canonical_json_is_sorted_and_compact() {
        let p = plan("p-1", 1, PlanAction::Start);
        let json = canonical_material_json(&p);
        assert!(json.starts_with(r#"{"action":"START","capital":{"budget_fraction":"1"}"#));
        assert!(!json.contains(' '));
        assert!(json.contains(r#""risk":{"stop_loss":null,"take_profit":null}"#));
    }

    #[test]
    fn test_trailing_zeros_do_not_change_hash() {
        let a = plan("p-1", 1, PlanAction::Start);
        let mut b = a.clone();
        b.range.low = dec!(100.000);
        assert_eq!(plan_hash(&a), plan_hash(&b));
    }

    #[test]
    fn test_material_change_changes_hash() {
        let a = plan("p-1", 1, PlanAction::Start);
        let mut b = a.clone();
        b.range.high = dec!(111);
        assert_ne!(plan_hash(&a), plan_hash(&b));
        b = a.clone();
        b.stop_reason = Some("regime_break".to_string());
        assert_ne!(plan_hash(&a), plan_hash(&b));
    }

    #[test]
    fn test_verify_order_duplicate_before_stale_before_hash() {
        let first = plan("p-1", 5, PlanAction::Start);
        let mut ledger = PlanLedger::default();
        assert_eq!(verify(&first, &ledger), PlanVerdict::Accept);
        ledger.record(&first, 16);

        let mut dup = first.clone();
        dup.decision_seq = 9;
        dup.plan_hash = "bogus".to_string();
        assert_eq!(verify(&dup, &ledger), PlanVerdict::DuplicateIgnored);

        let mut stale = plan("p-2", 5, PlanAction::Start);
        stale.plan_hash = "bogus".to_string();
        assert_eq!(
            verify(&stale, &ledger),
            PlanVerdict::StaleSeqIgnored { last_seq: 5 }
        );

        let mut tampered = plan("p-3", 6, PlanAction::Start);
        tampered.plan_hash = "deadbeef".to_string();
        let PlanVerdict::HashMismatch { expected, actual } = verify(&tampered, &ledger) else {
            panic!("expected hash mismatch");
        };
        assert_eq!(actual, "deadbeef");
        assert_eq!(expected, plan_hash(&tampered));
    }

    #[test]
    fn test_ledger_history_is_bounded() {
        let mut ledger = PlanLedger::default();
        for seq in 1..=5 {
            let mut p = plan(&format!("p-{seq}"), seq, PlanAction::Hold);
            rehash(&mut p);
            ledger.record(&p, 3);
        }
        assert_eq!(ledger.seen_plan_ids.len(), 3);
        assert!(!ledger.has_seen("p-1"));
        assert!(ledger.has_seen("p-5"));
        assert_eq!(ledger.last_seq(), Some(5));

        // An evicted id replayed with its old seq is still refused.
        let replayed = plan("p-1", 1, PlanAction::Hold);
        assert_eq!(
            verify(&replayed, &ledger),
            PlanVerdict::StaleSeqIgnored { last_seq: 5 }
        );
    }

    proptest! {
        #[test]
        fn hash_stable_under_bookkeeping_fields(
            id in "[a-z0-9-]{1,24}",
            seq in any::<u64>(),
            secs in 0i64..4_000_000_000,
            candle in any::<i64>(),
            supersedes in proptest::option::of("[a-z0-9-]{1,24}"),
        ) {
            let base = plan("base", 1, PlanAction::Start);
            let mut other = base.clone();
            other.plan_id = id;
            other.decision_seq = seq;
            other.generated_at = chrono::DateTime::from_timestamp(secs, 0).unwrap();
            other.valid_for_candle_ts = candle;
            other.supersedes_plan_id = supersedes;
            prop_assert_eq!(plan_hash(&base), plan_hash(&other));
        }
    }
}
