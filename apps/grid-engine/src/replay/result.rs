//! Simulation output.
//!
//! The result is written as pretty JSON for people; [`SimulationResult::summary_json`]
//! renders the aggregates compactly so two runs can be compared byte for
//! byte. Every map is a `BTreeMap` and every amount a `Decimal` string, so
//! the rendering never depends on hash order or float formatting.

use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::chaos::{BarChaos, ChaosCounters};
use crate::domain::core::PlanOutcome;
use crate::domain::events::EngineEvent;
use crate::domain::order::{Fill, FillReason, RestingOrder};
use crate::domain::plan::PlanAction;
use crate::domain::suppression::LadderOp;
use crate::state::{PersistenceError, write_json_atomic};

/// Faults that touched one processed bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosFlags {
    /// Fills blocked by latency.
    pub latency_blocked: bool,
    /// Spread shock applied, in bps.
    pub shock_bps: Decimal,
    /// Bar unusable for fills.
    pub data_gap: bool,
    /// Bar arrived one bar late.
    pub delayed: bool,
    /// Fills rejected by a burst.
    pub reject_burst: bool,
}

impl ChaosFlags {
    pub(crate) fn from_bar(chaos: &BarChaos, delayed: bool, reject_burst: bool) -> Self {
        Self {
            latency_blocked: chaos.latency_blocked,
            shock_bps: chaos.shock_bps,
            data_gap: chaos.data_gap,
            delayed,
            reject_burst,
        }
    }
}

/// Account snapshot after one processed bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Bar timestamp.
    pub ts: i64,
    /// Bar close.
    pub close: Decimal,
    /// Quote plus base valued at the close.
    pub equity: Decimal,
    /// Quote total.
    pub quote_total: Decimal,
    /// Base total.
    pub base_total: Decimal,
    /// Quote held by resting buys.
    pub quote_reserved: Decimal,
    /// Base held by resting sells.
    pub base_reserved: Decimal,
    /// Resting orders.
    pub open_orders: usize,
    /// Last effective action.
    pub action: Option<PlanAction>,
    /// Suppression reason of the last plan.
    pub suppression_reason: Option<String>,
    /// Injected faults, chaos runs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos: Option<ChaosFlags>,
}

/// Aggregates of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Bars in the input.
    pub bars_in: usize,
    /// Bars that reached the engine.
    pub bars_processed: usize,
    /// Plans offered to the verifier.
    pub plans_seen: usize,
    /// Plans that passed integrity checks.
    pub plans_accepted: usize,
    /// Raw verdicts of accepted plans.
    pub raw_actions: BTreeMap<String, u64>,
    /// Effective actions of accepted plans.
    pub effective_actions: BTreeMap<String, u64>,
    /// Ladders seeded from flat.
    pub seeds: u64,
    /// Ladders rebuilt.
    pub rebuilds: u64,
    /// Ladders repriced in place.
    pub soft_adjusts: u64,
    /// STOP plans executed plus stop-outs.
    pub stops: u64,
    /// Stop-outs fired on a close.
    pub stop_outs: u64,
    /// Suppressed plans.
    pub suppressions: u64,
    /// Fills of any kind.
    pub fills: u64,
    /// Fills that left the order open.
    pub partial_fills: u64,
    /// Liquidation fills.
    pub liquidations: u64,
    /// Fees paid in quote.
    pub fees_paid: Decimal,
    /// Equity at the first bar's open.
    pub initial_equity: Decimal,
    /// Equity at the last processed close.
    pub final_equity: Decimal,
    /// Final minus initial equity.
    pub pnl: Decimal,
    /// Event code histogram.
    pub reason_codes: BTreeMap<String, u64>,
    /// Suppression reason histogram.
    pub suppression_reasons: BTreeMap<String, u64>,
    /// Stop reason histogram.
    pub stop_reasons: BTreeMap<String, u64>,
    /// Fault counters, chaos runs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos: Option<ChaosCounters>,
}

impl RunSummary {
    pub(crate) fn record_outcome(&mut self, outcome: &PlanOutcome) {
        self.plans_seen += 1;
        let Some(decision) = outcome.decision else {
            return;
        };
        self.plans_accepted += 1;
        bump(&mut self.raw_actions, decision.raw.as_str());
        bump(&mut self.effective_actions, decision.effective.as_str());
        if let Some(reason) = decision.reason {
            self.suppressions += 1;
            bump(&mut self.suppression_reasons, reason.as_str());
            return;
        }
        match decision.op {
            LadderOp::Seed => self.seeds += 1,
            LadderOp::Rebuild => self.rebuilds += 1,
            LadderOp::SoftAdjust => self.soft_adjusts += 1,
            LadderOp::CancelAll { .. } => self.stops += 1,
            LadderOp::Keep => {}
        }
    }

    pub(crate) fn record_stop_reason(&mut self, reason: &str) {
        bump(&mut self.stop_reasons, reason);
    }

    pub(crate) fn record_stop_out(&mut self, trigger: &str) {
        self.stop_outs += 1;
        self.stops += 1;
        self.record_stop_reason(trigger);
    }

    pub(crate) fn record_fill(&mut self, fill: &Fill) {
        self.fills += 1;
        match fill.reason {
            FillReason::Partial => self.partial_fills += 1,
            FillReason::StopLiquidation => self.liquidations += 1,
            FillReason::Normal => {}
        }
    }

    pub(crate) fn record_events(&mut self, events: &[EngineEvent]) {
        for event in events {
            bump(&mut self.reason_codes, event.kind.code());
        }
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_default() += 1;
}

/// Chaos run minus baseline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosDelta {
    /// PnL difference in quote.
    pub pnl: Decimal,
    /// Fill count difference.
    pub fills: i64,
    /// Stop count difference.
    pub stops: i64,
    /// Suppression count difference.
    pub suppressions: i64,
}

impl ChaosDelta {
    /// `chaos` minus `baseline`.
    #[must_use]
    pub fn between(baseline: &RunSummary, chaos: &RunSummary) -> Self {
        let diff = |a: u64, b: u64| i64::try_from(a).unwrap_or(i64::MAX) - i64::try_from(b).unwrap_or(i64::MAX);
        Self {
            pnl: chaos.pnl - baseline.pnl,
            fills: diff(chaos.fills, baseline.fills),
            stops: diff(chaos.stops, baseline.stops),
            suppressions: diff(chaos.suppressions, baseline.suppressions),
        }
    }
}

/// Full output of a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Pair simulated.
    pub pair: String,
    /// Fills in execution order.
    pub fills: Vec<Fill>,
    /// Orders still resting at the end.
    pub open_orders: Vec<RestingOrder>,
    /// One point per processed bar.
    pub curve: Vec<CurvePoint>,
    /// Typed event log.
    pub events: Vec<EngineEvent>,
    /// Aggregates of the reported run.
    pub summary: RunSummary,
    /// Aggregates of the chaos-free run, when chaos was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<RunSummary>,
    /// Chaos minus baseline, when chaos was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChaosDelta>,
}

#[derive(Serialize)]
struct SummaryView<'a> {
    pair: &'a str,
    summary: &'a RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    baseline: Option<&'a RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<&'a ChaosDelta>,
}

impl SimulationResult {
    /// Compact JSON of the aggregates (summary, baseline, delta).
    pub fn summary_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SummaryView {
            pair: &self.pair,
            summary: &self.summary,
            baseline: self.baseline.as_ref(),
            delta: self.delta.as_ref(),
        })
    }
}

/// Write `result` atomically as pretty JSON.
pub fn write_result(path: &Path, result: &SimulationResult) -> Result<(), PersistenceError> {
    write_json_atomic(path, result)
}
