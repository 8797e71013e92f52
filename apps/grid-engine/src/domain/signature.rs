//! Ladder signatures and transition classification.
//!
//! A signature captures the range/grid geometry of a plan. Comparing the
//! previous and next signature yields one [`LadderTransition`], computed once
//! per plan and shared by the suppression rules and the ladder builder.
//! Weights and capital policy are not part of the signature.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::plan::Plan;

const SIGNATURE_DP: u32 = 8;

/// Geometry of a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSignature {
    /// Range low.
    pub low: Decimal,
    /// Range high.
    pub high: Decimal,
    /// Level count.
    pub levels: u32,
    /// Resolved step.
    pub step: Decimal,
}

impl LadderSignature {
    /// Signature of a plan's range/grid.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            low: plan.range.low.round_dp(SIGNATURE_DP).normalize(),
            high: plan.range.high.round_dp(SIGNATURE_DP).normalize(),
            levels: plan.grid.levels,
            step: plan.resolved_step().round_dp(SIGNATURE_DP).normalize(),
        }
    }

    /// Stable string form, used in the STOP de-duplication tuple.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("{}:{}:{}:{}", self.low, self.high, self.levels, self.step)
    }
}

/// How the ladder must change between two plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderTransition {
    /// Same geometry.
    Unchanged,
    /// Moved by less than the tolerance; reprice in place.
    SoftAdjust,
    /// First plan, level count change, or a large move.
    Rebuild,
}

impl LadderTransition {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::SoftAdjust => "soft_adjust",
            Self::Rebuild => "rebuild",
        }
    }
}

/// Classify the move from `prev` to `next`.
///
/// `tolerance_steps` is the largest shift of either bound, as a fraction of
/// the previous step, that still counts as a soft adjust.
#[must_use]
pub fn classify(
    prev: Option<&LadderSignature>,
    next: &LadderSignature,
    tolerance_steps: Decimal,
) -> LadderTransition {
    let Some(prev) = prev else {
        return LadderTransition::Rebuild;
    };
    if prev == next {
        return LadderTransition::Unchanged;
    }
    if prev.levels != next.levels {
        return LadderTransition::Rebuild;
    }
    let tolerance = prev.step * tolerance_steps;
    let low_shift = (next.low - prev.low).abs();
    let high_shift = (next.high - prev.high).abs();
    if tolerance > Decimal::ZERO && low_shift <= tolerance && high_shift <= tolerance {
        LadderTransition::SoftAdjust
    } else {
        LadderTransition::Rebuild
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::PlanAction;
    use crate::domain::plan::fixtures::plan;
    use rust_decimal_macros::dec;

    fn sig(low: Decimal, high: Decimal, levels: u32) -> LadderSignature {
        let mut p = plan("p", 1, PlanAction::Start);
        p.range.low = low;
        p.range.high = high;
        p.grid.levels = levels;
        LadderSignature::from_plan(&p)
    }

    #[test]
    fn test_first_plan_is_rebuild() {
        let next = sig(dec!(100), dec!(110), 4);
        assert_eq!(classify(None, &next, dec!(0.5)), LadderTransition::Rebuild);
    }

    #[test]
    fn test_equal_signature_is_unchanged() {
        let a = sig(dec!(100), dec!(110), 4);
        let b = sig(dec!(100.000), dec!(110), 4);
        assert_eq!(classify(Some(&a), &b, dec!(0.5)), LadderTransition::Unchanged);
    }

    #[test]
    fn test_small_shift_is_soft_adjust() {
        // step 2.5, tolerance 0.5 steps = 1.25
        let a = sig(dec!(100), dec!(110), 4);
        let b = sig(dec!(101), dec!(111), 4);
        assert_eq!(classify(Some(&a), &b, dec!(0.5)), LadderTransition::SoftAdjust);
    }

    #[test]
    fn test_large_shift_or_level_change_is_rebuild() {
        let a = sig(dec!(100), dec!(110), 4);
        let far = sig(dec!(103), dec!(113), 4);
        assert_eq!(classify(Some(&a), &far, dec!(0.5)), LadderTransition::Rebuild);
        let relevel = sig(dec!(100), dec!(110), 5);
        assert_eq!(classify(Some(&a), &relevel, dec!(0.5)), LadderTransition::Rebuild);
    }

    #[test]
    fn test_weights_and_capital_are_ignored() {
        let a = plan("a", 1, PlanAction::Start);
        let mut b = a.clone();
        b.grid.weights = Some(vec![dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)]);
        b.capital.budget_fraction = dec!(0.25);
        assert_eq!(
            classify(
                Some(&LadderSignature::from_plan(&a)),
                &LadderSignature::from_plan(&b),
                dec!(0.5)
            ),
            LadderTransition::Unchanged
        );
    }

    #[test]
    fn test_fingerprint_is_normalized() {
        let a = sig(dec!(100.0), dec!(110.00), 4);
        assert_eq!(a.fingerprint(), "100:110:4:2.5");
    }
}
