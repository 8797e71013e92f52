//! Live safety rules: reject-burst pause and the exit failsafe.
//!
//! Both escalate conservatively instead of retrying forever. A burst of
//! post-only rejects pauses the pair (START is suppressed to HOLD until the
//! window drains); an exit that cannot be confirmed while price runs away
//! is closed with a `failsafe_` stop reason.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state::{ExecutionState, PendingExit};

/// Pause reason raised by the reject-burst detector.
pub const REJECT_BURST_PAUSE: &str = "reject_burst";

/// Safety thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyParams {
    /// Trailing window for counting rejects (milliseconds).
    pub reject_window_ms: i64,
    /// Rejects inside the window that raise the pause.
    pub reject_burst_threshold: usize,
    /// Relative move from the exit reference price that triggers the
    /// failsafe (0.05 = 5%).
    pub failsafe_price_jump_pct: Decimal,
}

/// Change in the pause condition after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstChange {
    /// Nothing changed.
    Unchanged,
    /// Pause raised with this many rejects in the window.
    Raised(usize),
    /// Pause lifted.
    Cleared,
}

/// Rolling reject-burst detector over `ExecutionState::recent_rejects`.
///
/// The window lives in the persisted state so a restart keeps the pause.
#[derive(Debug, Clone, Copy)]
pub struct RejectBurstDetector {
    window_ms: i64,
    threshold: usize,
}

impl RejectBurstDetector {
    /// Detector from thresholds.
    #[must_use]
    pub const fn new(params: &SafetyParams) -> Self {
        Self {
            window_ms: params.reject_window_ms,
            threshold: params.reject_burst_threshold,
        }
    }

    /// Count a reject at `now`.
    pub fn record(&self, state: &mut ExecutionState, now: i64) -> usize {
        state.record_reject(now, self.window_ms)
    }

    /// Drain the window and raise or lift the pause.
    pub fn observe(&self, state: &mut ExecutionState, now: i64) -> BurstChange {
        let count = state.prune_rejects(now, self.window_ms);
        let paused = state.pause_reasons.iter().any(|r| r == REJECT_BURST_PAUSE);
        let bursting = self.threshold > 0 && count >= self.threshold;
        match (paused, bursting) {
            (false, true) => {
                state.pause_reasons.push(REJECT_BURST_PAUSE.to_string());
                BurstChange::Raised(count)
            }
            (true, false) => {
                state.pause_reasons.retain(|r| r != REJECT_BURST_PAUSE);
                BurstChange::Cleared
            }
            _ => BurstChange::Unchanged,
        }
    }
}

/// Where an in-flight exit stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// No venue orders remain and nothing is left to liquidate.
    Confirmed,
    /// Still waiting and price is within bounds.
    Pending,
    /// Unconfirmed and price moved beyond the threshold.
    Failsafe {
        /// Relative move from the reference price.
        price_move: Decimal,
    },
}

/// Evaluate an exit against the venue and the current price.
#[must_use]
pub fn evaluate_exit(
    exit: &PendingExit,
    venue_open_orders: usize,
    price: Decimal,
    dust_quantity: Decimal,
    params: &SafetyParams,
) -> ExitStatus {
    if venue_open_orders == 0 && exit.flatten_quantity <= dust_quantity {
        return ExitStatus::Confirmed;
    }
    if exit.reference_price <= Decimal::ZERO {
        return ExitStatus::Pending;
    }
    let price_move = ((price - exit.reference_price) / exit.reference_price).abs();
    if price_move > params.failsafe_price_jump_pct {
        ExitStatus::Failsafe { price_move }
    } else {
        ExitStatus::Pending
    }
}

/// Stop reason recorded when the failsafe closes an exit.
#[must_use]
pub fn failsafe_reason(reason: &str) -> String {
    format!("failsafe_{reason}")
}
