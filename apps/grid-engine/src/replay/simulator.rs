//! Replay of plans over historical bars.
//!
//! Every bar goes through the same decision core as the live executor:
//!
//! 1. release plans due at the bar and apply them at the open
//! 2. stop-out check on the close (short-circuits the bar)
//! 3. fill detection and propagation
//!
//! Liquidations are settled immediately at the reference price, so an exit
//! never stays pending across bars. With a chaos profile the run is done
//! twice, once chaos-free as the baseline, and the result reports the
//! difference.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::bars::{BarLoadError, validate_bars};
use super::chaos::{BarChaos, ChaosInjector, ChaosProfile, ChaosProfileError};
use super::result::{ChaosDelta, ChaosFlags, CurvePoint, RunSummary, SimulationResult};
use crate::domain::core::{self, CoreParams, DEFAULT_STOP_REASON, Execution};
use crate::domain::events::{EventKind, EventLog};
use crate::domain::fills::{Bar, detect_fills};
use crate::domain::ladder::floor_to_step;
use crate::domain::order::{Fill, FillReason};
use crate::domain::plan::{Plan, PlanError};
use crate::domain::suppression::LadderOp;
use crate::plans::PlanSchedule;
use crate::state::ExecutionState;

/// Errors raised before a simulation starts.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Bars failed validation.
    #[error("invalid price history: {0}")]
    Bars(#[from] BarLoadError),

    /// A plan failed structural validation.
    #[error("invalid plan {plan_id}: {source}")]
    Plan {
        /// Plan id.
        plan_id: String,
        /// Underlying error.
        #[source]
        source: PlanError,
    },

    /// A plan targets another pair.
    #[error("plan {plan_id} is for {plan_pair}, simulating {pair}")]
    PairMismatch {
        /// Plan id.
        plan_id: String,
        /// Pair on the plan.
        plan_pair: String,
        /// Pair being simulated.
        pair: String,
    },

    /// Starting balances are negative.
    #[error("starting balances must be non-negative")]
    NegativeBalance,

    /// Chaos profile rejected.
    #[error(transparent)]
    Chaos(#[from] ChaosProfileError),
}

/// Inputs that do not come from files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Pair being simulated.
    pub pair: String,
    /// Starting quote balance.
    pub initial_quote: Decimal,
    /// Starting base balance.
    pub initial_base: Decimal,
    /// Decision core tunables.
    pub core: CoreParams,
}

/// Replay `plans` over `bars`, optionally with chaos.
///
/// Plans are released in the given order; use
/// [`PlanStore::load_sequence`](crate::plans::PlanStore::load_sequence) to
/// obtain a properly ordered sequence.
pub fn simulate(
    config: &SimulationConfig,
    plans: &[Plan],
    bars: &[Bar],
    chaos: Option<&ChaosProfile>,
) -> Result<SimulationResult, SimulationError> {
    validate_inputs(config, plans, bars)?;
    let injector = chaos.copied().map(ChaosInjector::new).transpose()?;

    info!(
        pair = %config.pair,
        plans = plans.len(),
        bars = bars.len(),
        chaos = injector.is_some(),
        "Simulation started"
    );
    let baseline = Run::new(config, plans, None).execute(bars);
    let result = match injector {
        None => baseline.into_result(None),
        Some(injector) => {
            let run = Run::new(config, plans, Some(injector)).execute(bars);
            let delta = ChaosDelta::between(&baseline.summary, &run.summary);
            run.into_result(Some((baseline.summary, delta)))
        }
    };
    info!(
        pair = %config.pair,
        fills = result.summary.fills,
        stops = result.summary.stops,
        suppressions = result.summary.suppressions,
        pnl = %result.summary.pnl,
        "Simulation finished"
    );
    Ok(result)
}

fn validate_inputs(config: &SimulationConfig, plans: &[Plan], bars: &[Bar]) -> Result<(), SimulationError> {
    validate_bars(bars)?;
    if config.initial_quote < Decimal::ZERO || config.initial_base < Decimal::ZERO {
        return Err(SimulationError::NegativeBalance);
    }
    for plan in plans {
        plan.validate().map_err(|source| SimulationError::Plan {
            plan_id: plan.plan_id.clone(),
            source,
        })?;
        if plan.pair != config.pair {
            return Err(SimulationError::PairMismatch {
                plan_id: plan.plan_id.clone(),
                plan_pair: plan.pair.clone(),
                pair: config.pair.clone(),
            });
        }
    }
    Ok(())
}

/// One pass over the bars.
struct Run {
    params: CoreParams,
    state: ExecutionState,
    schedule: PlanSchedule,
    events: EventLog,
    fills: Vec<Fill>,
    curve: Vec<CurvePoint>,
    summary: RunSummary,
    chaos: Option<ChaosInjector>,
}

impl Run {
    fn new(config: &SimulationConfig, plans: &[Plan], chaos: Option<ChaosInjector>) -> Self {
        Self {
            params: config.core,
            state: ExecutionState::new(config.pair.clone(), config.initial_quote, config.initial_base),
            schedule: PlanSchedule::new(plans.to_vec()),
            events: EventLog::new(config.pair.clone()),
            fills: Vec::new(),
            curve: Vec::new(),
            summary: RunSummary::default(),
            chaos,
        }
    }

    fn execute(mut self, bars: &[Bar]) -> Self {
        self.summary.bars_in = bars.len();
        let first_open = bars.first().map_or(Decimal::ZERO, |b| b.open);
        self.summary.initial_equity = self.state.equity(first_open);

        let mut held: VecDeque<(Bar, BarChaos)> = VecDeque::new();
        for bar in bars {
            let draw = self.chaos.as_mut().map(ChaosInjector::draw_bar);
            self.feed(bar, draw, &mut held);
        }
        while let Some((late, chaos)) = held.pop_front() {
            self.process(&late, Some(chaos), true);
        }

        let last_close = self.curve.last().map_or(first_open, |p| p.close);
        self.summary.final_equity = self.state.equity(last_close);
        self.summary.pnl = self.summary.final_equity - self.summary.initial_equity;
        self.summary.fees_paid = self.state.fees_paid;
        self.summary.record_events(self.events.events());
        self.summary.chaos = self.chaos.as_ref().map(|c| *c.counters());
        self
    }

    /// Route one input bar. Bars held back by the previous input are
    /// released only after this one has been handled.
    fn feed(&mut self, bar: &Bar, chaos: Option<BarChaos>, held: &mut VecDeque<(Bar, BarChaos)>) {
        let ready = std::mem::take(held);
        match chaos {
            None => self.process(bar, None, false),
            Some(chaos) if chaos.missing => {
                if let Some(injector) = self.chaos.as_mut() {
                    injector.counters_mut().missing_candles += 1;
                }
                debug!(ts = bar.ts, "Candle dropped");
            }
            Some(chaos) if chaos.delayed => {
                if let Some(injector) = self.chaos.as_mut() {
                    injector.counters_mut().delayed_candles += 1;
                }
                debug!(ts = bar.ts, "Candle delayed");
                held.push_back((*bar, chaos));
            }
            Some(chaos) => self.process(bar, Some(chaos), false),
        }
        for (late, chaos) in ready {
            self.process(&late, Some(chaos), true);
        }
    }

    fn process(&mut self, bar: &Bar, chaos: Option<BarChaos>, late: bool) {
        self.state.bar_seq += 1;
        self.summary.bars_processed += 1;

        for plan in self.schedule.due(bar.ts) {
            let outcome = core::apply_plan(&mut self.state, &plan, bar.open, bar.ts, &self.params, &mut self.events);
            self.summary.record_outcome(&outcome);
            let executed_stop = outcome
                .decision
                .is_some_and(|d| d.reason.is_none() && matches!(d.op, LadderOp::CancelAll { .. }));
            if executed_stop {
                let reason = self.state.stop_reason.clone();
                self.summary
                    .record_stop_reason(reason.as_deref().unwrap_or(DEFAULT_STOP_REASON));
            }
            self.settle_exit(bar.open, bar.ts);
        }

        let in_burst = self.chaos.as_ref().is_some_and(ChaosInjector::in_burst);
        let flags = chaos.map(|c| ChaosFlags::from_bar(&c, late, in_burst));
        let chaos = chaos.unwrap_or_default();
        if let Some(injector) = self.chaos.as_mut() {
            let counters = injector.counters_mut();
            if chaos.shock_bps > Decimal::ZERO {
                counters.spread_shocks += 1;
            }
            if chaos.data_gap {
                counters.data_gaps += 1;
            } else if chaos.latency_blocked {
                counters.latency_blocked_bars += 1;
            }
        }

        if chaos.data_gap {
            debug!(ts = bar.ts, "Data gap; bar skipped for fills");
        } else if let Some(stop) = core::check_stop_out(&mut self.state, bar.close, bar.ts, &self.params, &mut self.events)
        {
            self.summary.record_stop_out(stop.trigger.as_str());
            self.settle_exit(bar.close, bar.ts);
        } else if chaos.latency_blocked {
            debug!(ts = bar.ts, latency_ms = chaos.latency_ms, "Fills blocked by latency");
        } else {
            self.fill_bar(bar, chaos.shock_bps, in_burst);
        }

        self.state.prune_terminal_orders();
        self.state.recompute_reserved();
        if let Some(injector) = self.chaos.as_mut() {
            injector.end_bar();
        }
        self.curve.push(CurvePoint {
            ts: bar.ts,
            close: bar.close,
            equity: self.state.equity(bar.close),
            quote_total: self.state.balances.quote_total,
            base_total: self.state.balances.base_total,
            quote_reserved: self.state.balances.quote_reserved,
            base_reserved: self.state.balances.base_reserved,
            open_orders: self.state.orders.len(),
            action: self.state.last_effective_action,
            suppression_reason: self.state.suppression_reason.clone(),
            chaos: flags,
        });
    }

    fn fill_bar(&mut self, bar: &Bar, shock_bps: Decimal, in_burst: bool) {
        let hits = detect_fills(
            &self.state.orders,
            bar,
            self.state.bar_seq,
            &self.state.fill_guard,
            shock_bps,
        );
        let qty_step = self.params.ladder.qty_step;
        for index in hits {
            let order = &self.state.orders[index];
            let (remaining, price, client_id) = (order.remaining(), order.price, order.client_id.clone());
            if in_burst {
                if let Some(injector) = self.chaos.as_mut() {
                    injector.counters_mut().rejected_fills += 1;
                }
                self.events.emit(bar.ts, EventKind::ExecFillRejected { client_id });
                continue;
            }
            let quantity = match self.chaos.as_mut().and_then(ChaosInjector::draw_partial) {
                Some(ratio) => floor_to_step(remaining * ratio, qty_step).max(qty_step).min(remaining),
                None => remaining,
            };
            let execution = Execution::at(quantity, price, bar.ts);
            if let Some(fill) = core::apply_fill(&mut self.state, index, execution, &self.params, &mut self.events) {
                if fill.reason == FillReason::Partial {
                    if let Some(injector) = self.chaos.as_mut() {
                        injector.counters_mut().partial_fills += 1;
                    }
                }
                self.summary.record_fill(&fill);
                self.fills.push(fill);
            }
        }
    }

    /// Liquidate and close a pending exit at `price`.
    fn settle_exit(&mut self, price: Decimal, ts: i64) {
        let Some(exit) = self.state.pending_exit.clone() else {
            return;
        };
        let quantity = floor_to_step(
            exit.flatten_quantity.min(self.state.balances.base_total),
            self.params.ladder.qty_step,
        );
        if quantity > self.params.dust_quantity {
            let execution = Execution::at(quantity, price, ts);
            if let Some(fill) = core::settle_liquidation(&mut self.state, execution, &self.params, &mut self.events) {
                self.summary.record_fill(&fill);
                self.fills.push(fill);
            }
        }
        self.state.pending_exit = None;
        self.events.emit(ts, EventKind::ExecExitConfirmed { reason: exit.reason });
    }

    fn into_result(self, baseline: Option<(RunSummary, ChaosDelta)>) -> SimulationResult {
        let (baseline, delta) = baseline.unzip();
        SimulationResult {
            pair: self.state.pair.clone(),
            fills: self.fills,
            open_orders: self.state.orders,
            curve: self.curve,
            events: self.events.into_events(),
            summary: self.summary,
            baseline,
            delta,
        }
    }
}
