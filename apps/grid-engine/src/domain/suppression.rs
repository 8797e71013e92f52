//! Action suppression state machine.
//!
//! Maps a plan's raw action to the effective action, given the ladder
//! transition and the pair's current liveness. Pure: no I/O, no clock.
//!
//! | Raw | Condition | Effective | Reason |
//! |-----|-----------|-----------|--------|
//! | START | reject-burst pause active | HOLD | `start_blocked_reject_burst` |
//! | START | orders active, geometry unchanged | HOLD | `duplicate_start_manage_existing` |
//! | START | otherwise | START | |
//! | STOP | idle, nothing to flatten, same STOP tuple already effective | HOLD | `duplicate_stop_already_cleared` |
//! | STOP | otherwise | STOP | |
//! | HOLD | any | HOLD | |

use serde::{Deserialize, Serialize};

use super::plan::PlanAction;
use super::signature::LadderTransition;

/// Liveness of a pair's ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairPhase {
    /// No resting orders.
    Idle,
    /// At least one resting order.
    Active,
}

/// Why a raw action was downgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// START with an identical ladder already resting.
    DuplicateStartManageExisting,
    /// STOP that was already applied and left nothing behind.
    DuplicateStopAlreadyCleared,
    /// START while a reject-burst pause is active.
    StartBlockedRejectBurst,
}

impl SuppressionReason {
    /// Snake-case reason code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateStartManageExisting => "duplicate_start_manage_existing",
            Self::DuplicateStopAlreadyCleared => "duplicate_stop_already_cleared",
            Self::StartBlockedRejectBurst => "start_blocked_reject_burst",
        }
    }
}

/// What the ladder should do after the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LadderOp {
    /// Build from empty.
    Seed,
    /// Cancel everything and build again.
    Rebuild,
    /// Reprice existing orders by level index.
    SoftAdjust,
    /// Leave the book untouched.
    Keep,
    /// Cancel everything, optionally liquidating inventory.
    CancelAll {
        /// Whether a flatten is requested.
        flatten: bool,
    },
}

impl LadderOp {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Rebuild => "rebuild",
            Self::SoftAdjust => "soft_adjust",
            Self::Keep => "keep",
            Self::CancelAll { .. } => "cancel_all",
        }
    }
}

/// Last effective action tuple, used to recognize repeated STOPs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveRecord {
    /// Effective action.
    pub action: PlanAction,
    /// Ladder signature fingerprint of the plan.
    pub signature: String,
    /// Stop reason of the plan.
    pub stop_reason: Option<String>,
}

/// Inputs to [`decide`].
#[derive(Debug, Clone, Copy)]
pub struct SuppressionInput<'a> {
    /// Raw plan action.
    pub raw: PlanAction,
    /// Transition from the previous ladder signature.
    pub transition: LadderTransition,
    /// Current liveness.
    pub phase: PairPhase,
    /// An exit liquidation is still outstanding.
    pub pending_flatten: bool,
    /// A reject-burst pause is active.
    pub paused: bool,
    /// Whether STOP should liquidate inventory.
    pub flatten_enabled: bool,
    /// Fingerprint of the incoming plan's signature.
    pub signature: &'a str,
    /// Stop reason of the incoming plan.
    pub stop_reason: Option<&'a str>,
    /// Last effective tuple.
    pub last_effective: Option<&'a EffectiveRecord>,
}

/// Result of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecision {
    /// Raw action from the plan.
    pub raw: PlanAction,
    /// Action actually executed.
    pub effective: PlanAction,
    /// Why raw and effective differ.
    pub reason: Option<SuppressionReason>,
    /// Ladder operation to run.
    pub op: LadderOp,
}

impl ActionDecision {
    /// Whether the raw action was downgraded.
    #[must_use]
    pub const fn is_suppressed(&self) -> bool {
        self.reason.is_some()
    }

    const fn new(raw: PlanAction, effective: PlanAction, op: LadderOp) -> Self {
        Self {
            raw,
            effective,
            reason: None,
            op,
        }
    }

    const fn suppressed(raw: PlanAction, reason: SuppressionReason) -> Self {
        Self {
            raw,
            effective: PlanAction::Hold,
            reason: Some(reason),
            op: LadderOp::Keep,
        }
    }
}

/// Decide the effective action for a verified plan.
#[must_use]
pub fn decide(input: &SuppressionInput<'_>) -> ActionDecision {
    let raw = input.raw;
    match raw {
        PlanAction::Start => {
            if input.paused {
                return ActionDecision::suppressed(raw, SuppressionReason::StartBlockedRejectBurst);
            }
            match (input.phase, input.transition) {
                (PairPhase::Idle, _) => ActionDecision::new(raw, PlanAction::Start, LadderOp::Seed),
                (PairPhase::Active, LadderTransition::Unchanged) => ActionDecision::suppressed(
                    raw,
                    SuppressionReason::DuplicateStartManageExisting,
                ),
                (PairPhase::Active, LadderTransition::SoftAdjust) => {
                    ActionDecision::new(raw, PlanAction::Start, LadderOp::SoftAdjust)
                }
                (PairPhase::Active, LadderTransition::Rebuild) => {
                    ActionDecision::new(raw, PlanAction::Start, LadderOp::Rebuild)
                }
            }
        }
        PlanAction::Stop => {
            let already_cleared = input.phase == PairPhase::Idle
                && !input.pending_flatten
                && input.last_effective.is_some_and(|last| {
                    last.action == PlanAction::Stop
                        && last.signature == input.signature
                        && last.stop_reason.as_deref() == input.stop_reason
                });
            if already_cleared {
                ActionDecision::suppressed(raw, SuppressionReason::DuplicateStopAlreadyCleared)
            } else {
                ActionDecision::new(
                    raw,
                    PlanAction::Stop,
                    LadderOp::CancelAll {
                        flatten: input.flatten_enabled,
                    },
                )
            }
        }
        PlanAction::Hold => ActionDecision::new(raw, PlanAction::Hold, LadderOp::Keep),
    }
}
