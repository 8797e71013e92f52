//! Typed, reason-coded engine events.
//!
//! Both modes append to an [`EventLog`]; every event is mirrored to
//! `tracing` with its `code` so logs and the event log agree.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::Side;

/// Event payload. Serialized with a `code` tag such as `EXEC_PLAN_ACCEPTED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Plan passed integrity checks.
    ExecPlanAccepted {
        /// Plan id.
        plan_id: String,
        /// Sequence.
        decision_seq: u64,
    },
    /// Plan id seen before.
    ExecPlanDuplicateIgnored {
        /// Plan id.
        plan_id: String,
    },
    /// Sequence not newer than the last applied one.
    ExecPlanStaleIgnored {
        /// Plan id.
        plan_id: String,
        /// Offending sequence.
        decision_seq: u64,
        /// Last applied sequence.
        last_seq: u64,
    },
    /// Recomputed hash does not match.
    ExecPlanHashMismatch {
        /// Plan id.
        plan_id: String,
        /// Recomputed hash.
        expected: String,
        /// Provided hash.
        actual: String,
    },
    /// Raw action downgraded.
    ExecPlanSuppressed {
        /// Plan id.
        plan_id: String,
        /// Raw action.
        raw: String,
        /// Effective action.
        effective: String,
        /// Reason code.
        reason: String,
    },
    /// Effective action executed.
    ExecPlanApplied {
        /// Plan id.
        plan_id: String,
        /// Raw action.
        raw: String,
        /// Effective action.
        effective: String,
        /// Ladder operation.
        op: String,
        /// Ladder transition.
        transition: String,
    },
    /// Orders seeded or rebuilt.
    ExecLadderSeeded {
        /// Orders created.
        orders: usize,
    },
    /// Orders repriced in place.
    ExecLadderSoftAdjusted {
        /// Orders moved.
        repriced: usize,
        /// Buys dropped to stay inside the price and budget.
        canceled: usize,
    },
    /// Orders canceled.
    ExecLadderCanceled {
        /// Orders canceled.
        canceled: usize,
    },
    /// Cooldown memory reset after a settings change.
    ExecFillGuardRearmed,
    /// Execution recorded.
    ExecFill {
        /// Side.
        side: Side,
        /// Price.
        price: Decimal,
        /// Quantity.
        quantity: Decimal,
        /// Rung, if any.
        level_index: Option<usize>,
        /// Reason tag.
        reason: String,
    },
    /// Opposite order could not be added.
    ExecPropagationSkipped {
        /// Side of the skipped order.
        side: Side,
        /// Rung.
        level_index: usize,
        /// Why.
        reason: String,
    },
    /// Stop-out fired on a close.
    ExecStopOut {
        /// Trigger code.
        trigger: String,
        /// Close that fired it.
        close: Decimal,
    },
    /// Inventory liquidation requested or executed.
    ExecFlatten {
        /// Quantity.
        quantity: Decimal,
        /// Price.
        price: Decimal,
        /// Reason code.
        reason: String,
    },
    /// Fill rejected while a reject burst is active.
    ExecFillRejected {
        /// Client order id.
        client_id: String,
    },
    /// Order given up after post-only retries.
    ExecOrderRejected {
        /// Client order id.
        client_id: String,
        /// Attempts made.
        attempts: u32,
        /// Last venue message.
        message: String,
    },
    /// Venue call failed after retries.
    ExecVenueError {
        /// Operation name.
        operation: String,
        /// Error text.
        message: String,
    },
    /// Reconciliation left work for the next tick.
    ExecReconcileDeferred {
        /// Actions deferred.
        deferred: usize,
    },
    /// Reject burst pause raised.
    ExecRejectBurstPause {
        /// Rejects inside the window.
        rejects: usize,
    },
    /// Reject burst pause cleared.
    ExecRejectBurstCleared,
    /// Exit confirmed: nothing rests and the liquidation is done.
    ExecExitConfirmed {
        /// Stop reason.
        reason: String,
    },
    /// Exit forced through the failsafe.
    ExecExitFailsafe {
        /// Escalated reason.
        reason: String,
        /// Price move since the exit started, as a fraction.
        price_move: Decimal,
    },
    /// Plan file could not be loaded.
    ExecPlanInputError {
        /// Error text.
        message: String,
    },
}

impl EventKind {
    /// Upper-case event code, identical to the serialized tag.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ExecPlanAccepted { .. } => "EXEC_PLAN_ACCEPTED",
            Self::ExecPlanDuplicateIgnored { .. } => "EXEC_PLAN_DUPLICATE_IGNORED",
            Self::ExecPlanStaleIgnored { .. } => "EXEC_PLAN_STALE_IGNORED",
            Self::ExecPlanHashMismatch { .. } => "EXEC_PLAN_HASH_MISMATCH",
            Self::ExecPlanSuppressed { .. } => "EXEC_PLAN_SUPPRESSED",
            Self::ExecPlanApplied { .. } => "EXEC_PLAN_APPLIED",
            Self::ExecLadderSeeded { .. } => "EXEC_LADDER_SEEDED",
            Self::ExecLadderSoftAdjusted { .. } => "EXEC_LADDER_SOFT_ADJUSTED",
            Self::ExecLadderCanceled { .. } => "EXEC_LADDER_CANCELED",
            Self::ExecFillGuardRearmed => "EXEC_FILL_GUARD_REARMED",
            Self::ExecFill { .. } => "EXEC_FILL",
            Self::ExecPropagationSkipped { .. } => "EXEC_PROPAGATION_SKIPPED",
            Self::ExecStopOut { .. } => "EXEC_STOP_OUT",
            Self::ExecFlatten { .. } => "EXEC_FLATTEN",
            Self::ExecFillRejected { .. } => "EXEC_FILL_REJECTED",
            Self::ExecOrderRejected { .. } => "EXEC_ORDER_REJECTED",
            Self::ExecVenueError { .. } => "EXEC_VENUE_ERROR",
            Self::ExecReconcileDeferred { .. } => "EXEC_RECONCILE_DEFERRED",
            Self::ExecRejectBurstPause { .. } => "EXEC_REJECT_BURST_PAUSE",
            Self::ExecRejectBurstCleared => "EXEC_REJECT_BURST_CLEARED",
            Self::ExecExitConfirmed { .. } => "EXEC_EXIT_CONFIRMED",
            Self::ExecExitFailsafe { .. } => "EXEC_EXIT_FAILSAFE",
            Self::ExecPlanInputError { .. } => "EXEC_PLAN_INPUT_ERROR",
        }
    }
}

/// Event with its position and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Position in the log.
    pub seq: u64,
    /// Bar or tick time (epoch milliseconds).
    pub ts: i64,
    /// Pair.
    pub pair: String,
    /// Payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Append-only event log for one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pair: String,
    events: Vec<EngineEvent>,
}

impl EventLog {
    /// Empty log for a pair.
    #[must_use]
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            events: Vec::new(),
        }
    }

    /// Append an event and mirror it to `tracing`.
    pub fn emit(&mut self, ts: i64, kind: EventKind) {
        let code = kind.code();
        match &kind {
            EventKind::ExecPlanHashMismatch {
                plan_id,
                expected,
                actual,
            } => {
                tracing::error!(pair = %self.pair, code, plan_id, expected, actual, "plan hash mismatch");
            }
            EventKind::ExecOrderRejected { .. }
            | EventKind::ExecVenueError { .. }
            | EventKind::ExecRejectBurstPause { .. }
            | EventKind::ExecExitFailsafe { .. }
            | EventKind::ExecPlanInputError { .. } => {
                tracing::warn!(pair = %self.pair, code, event = ?kind, "engine event");
            }
            EventKind::ExecFill { .. } | EventKind::ExecFillRejected { .. } => {
                tracing::debug!(pair = %self.pair, code, event = ?kind, "engine event");
            }
            _ => {
                tracing::info!(pair = %self.pair, code, event = ?kind, "engine event");
            }
        }
        let seq = self.events.len() as u64;
        self.events.push(EngineEvent {
            seq,
            ts,
            pair: self.pair.clone(),
            kind,
        });
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    /// Number of events carrying `code`.
    #[must_use]
    pub fn count(&self, code: &str) -> usize {
        self.events.iter().filter(|e| e.kind.code() == code).count()
    }

    /// Consume the log.
    #[must_use]
    pub fn into_events(self) -> Vec<EngineEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag_matches_code() {
        let kinds = [
            EventKind::ExecPlanDuplicateIgnored {
                plan_id: "p".to_string(),
            },
            EventKind::ExecFillGuardRearmed,
            EventKind::ExecStopOut {
                trigger: "stop_loss".to_string(),
                close: Decimal::ONE,
            },
        ];
        for kind in kinds {
            let value = serde_json::to_value(&kind).unwrap();
            assert_eq!(value["code"], kind.code());
        }
    }

    #[test]
    fn test_log_sequences_events() {
        let mut log = EventLog::new("ETH/USDT");
        log.emit(1, EventKind::ExecLadderSeeded { orders: 2 });
        log.emit(2, EventKind::ExecLadderCanceled { canceled: 2 });
        assert_eq!(log.events()[1].seq, 1);
        assert_eq!(log.count("EXEC_LADDER_SEEDED"), 1);

        let json = serde_json::to_value(&log.events()[0]).unwrap();
        assert_eq!(json["code"], "EXEC_LADDER_SEEDED");
        assert_eq!(json["pair"], "ETH/USDT");
        assert_eq!(json["orders"], 2);
    }
}
