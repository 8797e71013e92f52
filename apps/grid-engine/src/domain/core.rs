//! Decision core shared by the live executor and the replay simulator.
//!
//! Everything that changes an [`ExecutionState`] in response to a plan, a
//! stop-out or a fill goes through here, so both modes apply identical
//! business rules. Callers own I/O: the simulator settles liquidations
//! immediately, the executor routes them to the venue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::events::{EventKind, EventLog};
use super::fills::{ExitLevels, StopTrigger, opposite_level};
use super::integrity::{self, PlanVerdict};
use super::ladder::{self, LadderInput, LadderParams, floor_to_step};
use super::order::{Fill, FillReason, OrderStatus, RestingOrder, Side};
use super::plan::{Plan, PlanAction};
use super::signature::{self, LadderSignature, LadderTransition};
use super::suppression::{self, ActionDecision, EffectiveRecord, LadderOp, SuppressionInput};
use crate::state::{ExecutionState, PendingExit};

/// Stop reason recorded when a STOP plan carries none.
pub const DEFAULT_STOP_REASON: &str = "plan_stop";

/// Tunables of the decision core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreParams {
    /// Ladder sizing constraints.
    pub ladder: LadderParams,
    /// Fee charged on notional, in quote.
    pub fee_rate: Decimal,
    /// Soft-adjust tolerance as a fraction of one step.
    pub soft_adjust_tolerance_steps: Decimal,
    /// Range fallback stop distance, in steps.
    pub stop_out_range_steps: Decimal,
    /// Liquidate inventory on STOP and stop-outs.
    pub flatten_on_stop: bool,
    /// Base inventory at or below this is not liquidated.
    pub dust_quantity: Decimal,
    /// Accepted plan ids remembered per pair.
    pub plan_id_history: usize,
}

/// Result of applying one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    /// Integrity verdict.
    pub verdict: PlanVerdict,
    /// Ladder transition (accepted plans only).
    pub transition: Option<LadderTransition>,
    /// Suppression decision (accepted plans only).
    pub decision: Option<ActionDecision>,
    /// Orders created.
    pub seeded: usize,
    /// Orders canceled.
    pub canceled: usize,
    /// Orders repriced.
    pub repriced: usize,
}

impl PlanOutcome {
    const fn rejected(verdict: PlanVerdict) -> Self {
        Self {
            verdict,
            transition: None,
            decision: None,
            seeded: 0,
            canceled: 0,
            repriced: 0,
        }
    }
}

/// One execution reported by a bar or by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Venue-reported fee; derived from the fee rate when absent.
    pub fee: Option<Decimal>,
    /// Execution time (epoch milliseconds).
    pub ts: i64,
}

impl Execution {
    /// Execution with a derived fee.
    #[must_use]
    pub const fn at(quantity: Decimal, price: Decimal, ts: i64) -> Self {
        Self {
            quantity,
            price,
            fee: None,
            ts,
        }
    }
}

/// A stop-out that fired on a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOut {
    /// Trigger.
    pub trigger: StopTrigger,
    /// Orders canceled.
    pub canceled: usize,
    /// Base quantity to liquidate (zero when flatten is off).
    pub flatten_quantity: Decimal,
}

/// Verify a plan, decide the effective action and update the ladder.
///
/// Integrity rejections leave `state` untouched apart from the event.
pub fn apply_plan(
    state: &mut ExecutionState,
    plan: &Plan,
    reference_price: Decimal,
    ts: i64,
    params: &CoreParams,
    events: &mut EventLog,
) -> PlanOutcome {
    let verdict = integrity::verify(plan, &state.ledger);
    match &verdict {
        PlanVerdict::Accept => events.emit(
            ts,
            EventKind::ExecPlanAccepted {
                plan_id: plan.plan_id.clone(),
                decision_seq: plan.decision_seq,
            },
        ),
        PlanVerdict::DuplicateIgnored => {
            events.emit(
                ts,
                EventKind::ExecPlanDuplicateIgnored {
                    plan_id: plan.plan_id.clone(),
                },
            );
            return PlanOutcome::rejected(verdict);
        }
        PlanVerdict::StaleSeqIgnored { last_seq } => {
            events.emit(
                ts,
                EventKind::ExecPlanStaleIgnored {
                    plan_id: plan.plan_id.clone(),
                    decision_seq: plan.decision_seq,
                    last_seq: *last_seq,
                },
            );
            return PlanOutcome::rejected(verdict);
        }
        PlanVerdict::HashMismatch { expected, actual } => {
            events.emit(
                ts,
                EventKind::ExecPlanHashMismatch {
                    plan_id: plan.plan_id.clone(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                },
            );
            return PlanOutcome::rejected(verdict);
        }
    }

    state.ledger.record(plan, params.plan_id_history);

    let next_signature = LadderSignature::from_plan(plan);
    let fingerprint = next_signature.fingerprint();
    let transition = signature::classify(
        state.signature.as_ref(),
        &next_signature,
        params.soft_adjust_tolerance_steps,
    );

    let had_settings = state.fill_guard.settings.is_some();
    if state.fill_guard.rearm(plan.fill_settings()) && had_settings {
        events.emit(ts, EventKind::ExecFillGuardRearmed);
    }

    let decision = suppression::decide(&SuppressionInput {
        raw: plan.action,
        transition,
        phase: state.phase(),
        pending_flatten: state.pending_exit.is_some(),
        paused: state.is_paused(),
        flatten_enabled: params.flatten_on_stop,
        signature: &fingerprint,
        stop_reason: plan.stop_reason.as_deref(),
        last_effective: state.last_effective.as_ref(),
    });

    state.last_raw_action = Some(decision.raw);
    state.last_effective_action = Some(decision.effective);
    state.suppression_reason = decision.reason.map(|r| r.as_str().to_string());
    if let Some(reason) = decision.reason {
        events.emit(
            ts,
            EventKind::ExecPlanSuppressed {
                plan_id: plan.plan_id.clone(),
                raw: decision.raw.to_string(),
                effective: decision.effective.to_string(),
                reason: reason.as_str().to_string(),
            },
        );
    } else {
        state.last_effective = Some(EffectiveRecord {
            action: decision.effective,
            signature: fingerprint,
            stop_reason: plan.stop_reason.clone(),
        });
    }
    state.signature = Some(next_signature);

    let mut outcome = PlanOutcome {
        verdict,
        transition: Some(transition),
        decision: Some(decision),
        seeded: 0,
        canceled: 0,
        repriced: 0,
    };

    match decision.op {
        LadderOp::Seed | LadderOp::Rebuild => {
            outcome.canceled = cancel_all(state);
            outcome.seeded = seed_ladder(state, plan, reference_price, params);
            state.exits = Some(ExitLevels::from_plan(plan));
            state.stop_reason = None;
            if outcome.canceled > 0 {
                events.emit(
                    ts,
                    EventKind::ExecLadderCanceled {
                        canceled: outcome.canceled,
                    },
                );
            }
            events.emit(
                ts,
                EventKind::ExecLadderSeeded {
                    orders: outcome.seeded,
                },
            );
        }
        LadderOp::SoftAdjust => {
            state.rungs = ladder::rungs(plan, params.ladder.tick_size);
            let adjusted = ladder::soft_adjust(
                &mut state.orders,
                &state.rungs,
                reference_price,
                state.balances.quote_total,
                &params.ladder,
            );
            state.prune_terminal_orders();
            outcome.repriced = adjusted.repriced;
            outcome.canceled = adjusted.canceled;
            state.exits = Some(ExitLevels::from_plan(plan));
            events.emit(
                ts,
                EventKind::ExecLadderSoftAdjusted {
                    repriced: adjusted.repriced,
                    canceled: adjusted.canceled,
                },
            );
        }
        LadderOp::Keep => {}
        LadderOp::CancelAll { flatten } => {
            outcome.canceled = cancel_all(state);
            state.exits = None;
            let reason = plan
                .stop_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());
            let quantity = flatten_quantity(state, flatten, params);
            begin_exit(state, &reason, reference_price, quantity, ts);
            state.stop_reason = Some(reason);
            events.emit(
                ts,
                EventKind::ExecLadderCanceled {
                    canceled: outcome.canceled,
                },
            );
        }
    }

    if decision.reason.is_none() {
        events.emit(
            ts,
            EventKind::ExecPlanApplied {
                plan_id: plan.plan_id.clone(),
                raw: decision.raw.to_string(),
                effective: decision.effective.to_string(),
                op: decision.op.as_str().to_string(),
                transition: transition.as_str().to_string(),
            },
        );
    }
    state.recompute_reserved();
    outcome
}

/// Cancel every live order. Returns how many were canceled.
pub fn cancel_all(state: &mut ExecutionState) -> usize {
    let mut canceled = 0;
    for order in state.orders.iter_mut().filter(|o| o.status.is_live()) {
        order.status = OrderStatus::Canceled;
        canceled += 1;
    }
    state.prune_terminal_orders();
    state.recompute_reserved();
    canceled
}

fn seed_ladder(state: &mut ExecutionState, plan: &Plan, reference_price: Decimal, params: &CoreParams) -> usize {
    state.rungs = ladder::rungs(plan, params.ladder.tick_size);
    let quote_budget =
        state.balances.quote_free * plan.capital.budget_fraction / (Decimal::ONE + params.fee_rate);
    let desired = ladder::build_ladder(
        &LadderInput {
            rungs: &state.rungs,
            weights: plan.grid.weights.as_deref(),
            reference_price,
            quote_budget,
            base_available: state.balances.base_free,
        },
        &params.ladder,
    );
    for d in &desired {
        let client_id = state.next_client_id();
        state.orders.push(RestingOrder::new(
            client_id,
            d.side,
            d.price,
            d.quantity,
            d.level_index,
            state.bar_seq,
        ));
    }
    desired.len()
}

fn flatten_quantity(state: &ExecutionState, flatten: bool, params: &CoreParams) -> Decimal {
    let base = state.balances.base_total;
    if flatten && base > params.dust_quantity {
        base
    } else {
        Decimal::ZERO
    }
}

fn begin_exit(state: &mut ExecutionState, reason: &str, reference_price: Decimal, quantity: Decimal, ts: i64) {
    state.pending_exit = Some(PendingExit {
        reason: reason.to_string(),
        reference_price,
        flatten_quantity: quantity,
        flatten_order_id: None,
        started_ts: ts,
    });
}

/// Check the close against the active exits; on a hit cancel everything
/// and open an exit.
pub fn check_stop_out(
    state: &mut ExecutionState,
    close: Decimal,
    ts: i64,
    params: &CoreParams,
    events: &mut EventLog,
) -> Option<StopOut> {
    let trigger = state.exits?.check(close, params.stop_out_range_steps)?;
    let canceled = cancel_all(state);
    state.exits = None;
    let flatten_quantity = flatten_quantity(state, params.flatten_on_stop, params);
    begin_exit(state, trigger.as_str(), close, flatten_quantity, ts);
    state.stop_reason = Some(trigger.as_str().to_string());
    events.emit(
        ts,
        EventKind::ExecStopOut {
            trigger: trigger.as_str().to_string(),
            close,
        },
    );
    events.emit(ts, EventKind::ExecLadderCanceled { canceled });
    Some(StopOut {
        trigger,
        canceled,
        flatten_quantity,
    })
}

/// Book a liquidation sell and reduce the pending exit's outstanding
/// quantity.
pub fn settle_liquidation(
    state: &mut ExecutionState,
    execution: Execution,
    params: &CoreParams,
    events: &mut EventLog,
) -> Option<Fill> {
    let Execution { price, fee, ts, .. } = execution;
    let quantity = execution.quantity.min(state.balances.base_total);
    if quantity <= Decimal::ZERO {
        return None;
    }
    let notional = quantity * price;
    let fee = fee.unwrap_or(notional * params.fee_rate);
    state.balances.base_total -= quantity;
    state.balances.quote_total += notional - fee;
    state.fees_paid += fee;
    let reason = state
        .pending_exit
        .as_ref()
        .map_or_else(|| DEFAULT_STOP_REASON.to_string(), |e| e.reason.clone());
    if let Some(exit) = state.pending_exit.as_mut() {
        exit.flatten_quantity = (exit.flatten_quantity - quantity).max(Decimal::ZERO);
    }
    events.emit(
        ts,
        EventKind::ExecFlatten {
            quantity,
            price,
            reason,
        },
    );
    state.recompute_reserved();
    Some(Fill {
        ts,
        side: Side::Sell,
        price,
        quantity,
        fee,
        level_index: None,
        client_id: None,
        reason: FillReason::StopLiquidation,
    })
}

/// Execute part or all of the order at `index` and propagate the ladder.
///
/// Partial executions keep the order resting. Terminal orders stay in the
/// book until the caller prunes, so indices remain valid across a bar.
pub fn apply_fill(
    state: &mut ExecutionState,
    index: usize,
    execution: Execution,
    params: &CoreParams,
    events: &mut EventLog,
) -> Option<Fill> {
    let Execution { price, fee, ts, .. } = execution;
    let order = state.orders.get_mut(index)?;
    let applied = order.apply_fill(execution.quantity);
    if applied <= Decimal::ZERO {
        return None;
    }
    let side = order.side;
    let level = order.level_index;
    let client_id = order.client_id.clone();
    let reason = if order.status == OrderStatus::Filled {
        FillReason::Normal
    } else {
        FillReason::Partial
    };

    let notional = applied * price;
    let fee = fee.unwrap_or(notional * params.fee_rate);
    match side {
        Side::Buy => {
            state.balances.quote_total -= notional + fee;
            state.balances.base_total += applied;
        }
        Side::Sell => {
            state.balances.base_total -= applied;
            state.balances.quote_total += notional - fee;
        }
    }
    state.fees_paid += fee;
    state.fill_guard.record(side, level, state.bar_seq);
    events.emit(
        ts,
        EventKind::ExecFill {
            side,
            price,
            quantity: applied,
            level_index: Some(level),
            reason: reason.as_str().to_string(),
        },
    );
    state.recompute_reserved();
    propagate(state, side, level, applied, ts, params, events);

    Some(Fill {
        ts,
        side,
        price,
        quantity: applied,
        fee,
        level_index: Some(level),
        client_id: Some(client_id),
        reason,
    })
}

/// Add the opposite order one rung away for the filled quantity.
fn propagate(
    state: &mut ExecutionState,
    side: Side,
    level: usize,
    filled: Decimal,
    ts: i64,
    params: &CoreParams,
    events: &mut EventLog,
) {
    let new_side = side.opposite();
    let skip = |events: &mut EventLog, level_index: usize, reason: &str| {
        events.emit(
            ts,
            EventKind::ExecPropagationSkipped {
                side: new_side,
                level_index,
                reason: reason.to_string(),
            },
        );
    };

    let Some(target) = opposite_level(side, level, state.rungs.len()) else {
        skip(events, level, "ladder_edge");
        return;
    };
    let price = state.rungs[target];
    let quantity = floor_to_step(filled, params.ladder.qty_step);
    if quantity <= Decimal::ZERO || price <= Decimal::ZERO || quantity * price < params.ladder.min_notional {
        skip(events, target, "below_min_notional");
        return;
    }
    let affordable = match new_side {
        Side::Buy => state.balances.quote_free >= quantity * price * (Decimal::ONE + params.fee_rate),
        Side::Sell => state.balances.base_free >= quantity,
    };
    if !affordable {
        skip(events, target, "insufficient_balance");
        return;
    }
    let client_id = state.next_client_id();
    state.orders.push(RestingOrder::new(
        client_id,
        new_side,
        price,
        quantity,
        target,
        state.bar_seq,
    ));
    state.recompute_reserved();
}

/// Effective action of an outcome, if the plan was accepted.
#[must_use]
pub fn effective_action(outcome: &PlanOutcome) -> Option<PlanAction> {
    outcome.decision.map(|d| d.effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::fixtures::{plan, rehash};
    use crate::domain::suppression::SuppressionReason;
    use rust_decimal_macros::dec;

    fn params() -> CoreParams {
        CoreParams {
            ladder: LadderParams {
                max_orders_per_side: 10,
                tick_size: None,
                qty_step: dec!(0.0001),
                min_notional: dec!(5),
                weight_min: dec!(0),
                weight_max: dec!(100),
            },
            fee_rate: dec!(0.001),
            soft_adjust_tolerance_steps: dec!(0.5),
            stop_out_range_steps: dec!(1),
            flatten_on_stop: true,
            dust_quantity: dec!(0.00001),
            plan_id_history: 64,
        }
    }

    fn fresh() -> (ExecutionState, EventLog) {
        (
            ExecutionState::new("ETH/USDT", dec!(1000), dec!(0)),
            EventLog::new("ETH/USDT"),
        )
    }

    #[test]
    fn test_start_seeds_buys_below_reference() {
        let (mut state, mut log) = fresh();
        let p = plan("p-1", 1, PlanAction::Start);
        let out = apply_plan(&mut state, &p, dec!(104), 0, &params(), &mut log);
        assert!(out.verdict.is_accept());
        assert_eq!(out.seeded, 2);
        let prices: Vec<Decimal> = state.orders.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![dec!(100), dec!(102.5)]);
        assert!(state.reservations_within_totals());
        assert_eq!(state.ledger.last_seq(), Some(1));
        assert_eq!(log.count("EXEC_PLAN_ACCEPTED"), 1);
        assert_eq!(log.count("EXEC_LADDER_SEEDED"), 1);
    }

    #[test]
    fn test_start_then_start_is_held() {
        let (mut state, mut log) = fresh();
        let first = plan("p-1", 1, PlanAction::Start);
        let second = plan("p-2", 2, PlanAction::Start);
        let a = apply_plan(&mut state, &first, dec!(104), 0, &params(), &mut log);
        let b = apply_plan(&mut state, &second, dec!(104), 1, &params(), &mut log);
        assert_eq!(effective_action(&a), Some(PlanAction::Start));
        assert_eq!(effective_action(&b), Some(PlanAction::Hold));
        assert_eq!(
            b.decision.unwrap().reason,
            Some(SuppressionReason::DuplicateStartManageExisting)
        );
        assert_eq!(state.orders.len(), 2);
        assert_eq!(
            state.suppression_reason.as_deref(),
            Some("duplicate_start_manage_existing")
        );
    }

    #[test]
    fn test_rejected_plan_leaves_state_untouched() {
        let (mut state, mut log) = fresh();
        apply_plan(&mut state, &plan("p-1", 3, PlanAction::Start), dec!(104), 0, &params(), &mut log);
        let before = state.clone();

        let dup = plan("p-1", 4, PlanAction::Stop);
        let stale = plan("p-2", 3, PlanAction::Stop);
        let mut bad = plan("p-3", 9, PlanAction::Stop);
        bad.plan_hash = "00".repeat(32);
        for p in [&dup, &stale, &bad] {
            let out = apply_plan(&mut state, p, dec!(104), 1, &params(), &mut log);
            assert!(!out.verdict.is_accept());
            assert_eq!(state, before);
        }
        assert_eq!(log.count("EXEC_PLAN_DUPLICATE_IGNORED"), 1);
        assert_eq!(log.count("EXEC_PLAN_STALE_IGNORED"), 1);
        assert_eq!(log.count("EXEC_PLAN_HASH_MISMATCH"), 1);
    }

    #[test]
    fn test_stop_clears_book_and_repeat_is_suppressed() {
        let (mut state, mut log) = fresh();
        apply_plan(&mut state, &plan("p-1", 1, PlanAction::Start), dec!(104), 0, &params(), &mut log);
        let mut stop = plan("p-2", 2, PlanAction::Stop);
        stop.stop_reason = Some("regime_break".to_string());
        rehash(&mut stop);
        let out = apply_plan(&mut state, &stop, dec!(104), 1, &params(), &mut log);
        assert_eq!(out.canceled, 2);
        assert!(state.orders.is_empty());
        assert_eq!(state.stop_reason.as_deref(), Some("regime_break"));
        // no inventory, so the exit has nothing to liquidate
        assert_eq!(state.pending_exit.as_ref().unwrap().flatten_quantity, Decimal::ZERO);
        state.pending_exit = None;

        let mut again = stop.clone();
        again.plan_id = "p-3".to_string();
        again.decision_seq = 3;
        let out = apply_plan(&mut state, &again, dec!(104), 2, &params(), &mut log);
        assert_eq!(
            out.decision.unwrap().reason,
            Some(SuppressionReason::DuplicateStopAlreadyCleared)
        );
    }

    #[test]
    fn test_hold_on_empty_never_seeds() {
        let (mut state, mut log) = fresh();
        let out = apply_plan(&mut state, &plan("p-1", 1, PlanAction::Hold), dec!(104), 0, &params(), &mut log);
        assert_eq!(out.seeded, 0);
        assert!(state.orders.is_empty());
    }

    #[test]
    fn test_soft_adjust_keeps_reservations_within_totals() {
        let (mut state, mut log) = fresh();
        apply_plan(&mut state, &plan("p-1", 1, PlanAction::Start), dec!(104), 0, &params(), &mut log);
        assert_eq!(state.balances.quote_reserved, dec!(998.99275));

        let mut shifted = plan("p-2", 2, PlanAction::Start);
        shifted.range.low = dec!(101);
        shifted.range.high = dec!(111);
        rehash(&mut shifted);
        let out = apply_plan(&mut state, &shifted, dec!(104), 1, &params(), &mut log);

        assert_eq!(out.decision.unwrap().op, LadderOp::SoftAdjust);
        assert_eq!(out.repriced, 2);
        assert_eq!(out.canceled, 0);
        let book: Vec<(Decimal, Decimal)> = state.orders.iter().map(|o| (o.price, o.quantity)).collect();
        assert_eq!(book, vec![(dec!(101), dec!(4.9455)), (dec!(103.5), dec!(4.826))]);
        assert!(state.reservations_within_totals());
        assert!(state.balances.quote_reserved <= state.balances.quote_total);
        assert_eq!(log.count("EXEC_LADDER_SOFT_ADJUSTED"), 1);
    }

    #[test]
    fn test_fill_propagates_sell_one_rung_up() {
        let (mut state, mut log) = fresh();
        apply_plan(&mut state, &plan("p-1", 1, PlanAction::Start), dec!(104), 0, &params(), &mut log);
        state.bar_seq = 1;
        let qty = state.orders[0].quantity;
        let fill = apply_fill(&mut state, 0, Execution::at(qty, dec!(100), 1), &params(), &mut log).unwrap();
        assert_eq!(fill.reason, FillReason::Normal);
        assert_eq!(fill.fee, qty * dec!(100) * dec!(0.001));
        state.prune_terminal_orders();

        let sell = state.orders.iter().find(|o| o.side == Side::Sell).unwrap();
        assert_eq!(sell.price, dec!(102.5));
        assert_eq!(sell.quantity, qty);
        assert_eq!(sell.level_index, 1);
        assert_eq!(sell.created_seq, 1);
        assert_eq!(state.balances.base_total, qty);
    }

    #[test]
    fn test_partial_fill_keeps_order_open() {
        let (mut state, mut log) = fresh();
        apply_plan(&mut state, &plan("p-1", 1, PlanAction::Start), dec!(104), 0, &params(), &mut log);
        let qty = state.orders[0].quantity;
        let half = floor_to_step(qty / dec!(2), dec!(0.0001));
        let fill = apply_fill(&mut state, 0, Execution::at(half, dec!(100), 1), &params(), &mut log).unwrap();
        assert_eq!(fill.reason, FillReason::Partial);
        assert_eq!(state.orders[0].status, OrderStatus::Partial);
        assert_eq!(state.orders[0].remaining(), qty - half);
    }

    #[test]
    fn test_stop_out_cancels_and_settles_inventory() {
        let (mut state, mut log) = fresh();
        apply_plan(&mut state, &plan("p-1", 1, PlanAction::Start), dec!(104), 0, &params(), &mut log);
        let qty = state.orders[0].quantity;
        apply_fill(&mut state, 0, Execution::at(qty, dec!(100), 1), &params(), &mut log);

        let stop = check_stop_out(&mut state, dec!(96), 2, &params(), &mut log).unwrap();
        assert_eq!(stop.trigger, StopTrigger::RangeBreakdown);
        assert!(state.orders.is_empty());
        assert_eq!(stop.flatten_quantity, qty);

        let fill = settle_liquidation(&mut state, Execution::at(qty, dec!(96), 2), &params(), &mut log).unwrap();
        assert_eq!(fill.reason, FillReason::StopLiquidation);
        assert_eq!(state.balances.base_total, Decimal::ZERO);
        assert_eq!(state.pending_exit.as_ref().unwrap().flatten_quantity, Decimal::ZERO);
        assert!(check_stop_out(&mut state, dec!(90), 3, &params(), &mut log).is_none());
    }
}
