//! Replay Integration Tests
//!
//! Drives the simulator end to end from fixture files: plans from a plan
//! directory, bars from JSON Lines, chaos from profile JSON and tunables
//! from YAML.

// Allow unwrap in tests - tests should panic on unexpected errors
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use grid_engine::config::load_config_from_string;
use grid_engine::domain::integrity::plan_hash;
use grid_engine::replay::{ChaosProfile, load_bars, simulate, write_result};
use grid_engine::{Bar, EventKind, FillReason, Plan, PlanAction, PlanStore, SimulationConfig, Side};

// =============================================================================
// Fixtures
// =============================================================================

fn fixture_path(relative: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(relative);
    path
}

/// Plan fixture exactly as stored on disk.
fn raw_plan(name: &str) -> Plan {
    let path = fixture_path(&format!("plans/{name}.json"));
    Plan::from_path(&path).unwrap_or_else(|e| panic!("Failed to load plan {}: {e}", path.display()))
}

/// Plan fixture with a freshly computed fingerprint.
fn signed_plan(name: &str) -> Plan {
    let mut plan = raw_plan(name);
    plan.plan_hash = plan_hash(&plan);
    plan
}

fn dip_bars() -> Vec<Bar> {
    load_bars(&fixture_path("bars/dip_and_recover.jsonl")).unwrap()
}

fn chaos(name: &str) -> ChaosProfile {
    ChaosProfile::from_path(&fixture_path(&format!("chaos/{name}.json"))).unwrap()
}

const CONFIG_YAML: &str = r#"
ladder:
  qty_step: "0.0001"
  min_notional: "5"
fills:
  fee_rate: "0.001"
replay:
  pair: "ETH/USDT"
  initial_quote: "1000"
"#;

fn sim_config() -> SimulationConfig {
    load_config_from_string(CONFIG_YAML).unwrap().simulation_config()
}

fn write_plan(dir: &Path, file_name: &str, plan: &Plan) {
    std::fs::write(dir.join(file_name), serde_json::to_string_pretty(plan).unwrap()).unwrap();
}

// =============================================================================
// Ladder behaviour
// =============================================================================

#[test]
fn test_seeded_ladder_fills_and_appends_opposite_sell() {
    // 4 levels over [100, 110]: rungs 100, 102.5, 105, 107.5, 110.
    // Reference 104 and no inventory: buys at 100 and 102.5 only.
    let bars: Vec<Bar> = dip_bars().into_iter().take(2).collect();
    let result = simulate(&sim_config(), &[signed_plan("start")], &bars, None).unwrap();

    assert_eq!(result.summary.seeds, 1);
    assert_eq!(result.summary.fills, 2);

    // Budget 1000 less fees, split evenly over two rungs.
    let low_buy = result
        .fills
        .iter()
        .find(|f| f.side == Side::Buy && f.price == dec!(100))
        .unwrap();
    assert_eq!(low_buy.quantity, dec!(4.995));
    assert_eq!(low_buy.level_index, Some(0));
    assert_eq!(low_buy.reason, FillReason::Normal);

    let sell = result
        .open_orders
        .iter()
        .find(|o| o.side == Side::Sell && o.price == dec!(102.5))
        .unwrap();
    assert_eq!(sell.quantity, low_buy.quantity);
    assert_eq!(sell.level_index, 1);
    assert!(result.open_orders.iter().all(|o| o.side == Side::Sell));
    assert!(
        result
            .open_orders
            .iter()
            .any(|o| o.price == dec!(105) && o.quantity == dec!(4.8731))
    );

    let point = result.curve.last().unwrap();
    assert_eq!(point.base_total, dec!(9.8681));
    assert_eq!(point.action, Some(PlanAction::Start));
}

#[test]
fn test_round_trips_realise_profit_over_full_history() {
    let result = simulate(&sim_config(), &[signed_plan("start")], &dip_bars(), None).unwrap();

    let sells = result.fills.iter().filter(|f| f.side == Side::Sell).count();
    assert!(sells >= 2);
    assert!(result.summary.fees_paid > Decimal::ZERO);
    assert_eq!(result.summary.initial_equity, dec!(1000));
    assert_eq!(result.summary.pnl, result.summary.final_equity - result.summary.initial_equity);
    assert_eq!(result.curve.len(), 8);
    assert_eq!(result.summary.stop_outs, 0);
}

#[test]
fn test_unsigned_plan_is_rejected_and_never_trades() {
    let result = simulate(&sim_config(), &[raw_plan("start")], &dip_bars(), None).unwrap();

    assert_eq!(result.summary.plans_seen, 1);
    assert_eq!(result.summary.plans_accepted, 0);
    assert_eq!(result.summary.fills, 0);
    assert!(result.open_orders.is_empty());
    assert_eq!(result.summary.pnl, Decimal::ZERO);
    assert!(
        result
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::ExecPlanHashMismatch { .. }))
    );
}

#[test]
fn test_reservations_stay_within_totals_on_every_bar() {
    let start = signed_plan("start");
    // Shifted by one unit against a 2.5 step: repriced in place at the same open.
    let mut shifted = raw_plan("restart");
    shifted.valid_for_candle_ts = 0;
    shifted.range.low = dec!(101);
    shifted.range.high = dec!(111);
    shifted.plan_hash = plan_hash(&shifted);

    let result = simulate(&sim_config(), &[start, shifted], &dip_bars(), None).unwrap();

    assert_eq!(result.summary.soft_adjusts, 1);
    assert!(result.summary.fills > 0);
    assert_eq!(result.curve.len(), 8);
    for point in &result.curve {
        assert!(point.quote_reserved <= point.quote_total, "quote over-reserved at {}", point.ts);
        assert!(point.base_reserved <= point.base_total, "base over-reserved at {}", point.ts);
    }
}

// =============================================================================
// Plan directory replay
// =============================================================================

#[test]
fn test_plan_directory_replay_holds_duplicate_start() {
    let dir = tempfile::tempdir().unwrap();
    let start = signed_plan("start");
    let restart = signed_plan("restart");
    write_plan(dir.path(), "20250101T000000Z.json", &start);
    write_plan(dir.path(), "20250101T000200Z.json", &restart);
    write_plan(dir.path(), "latest.json", &restart);

    let plans = PlanStore::new(dir.path(), "latest.json")
        .load_sequence(Some("ETH/USDT"))
        .unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].plan_id, "plan-eth-0001");

    let result = simulate(&sim_config(), &plans, &dip_bars(), None).unwrap();
    let summary = &result.summary;
    assert_eq!(summary.plans_accepted, 2);
    assert_eq!(summary.raw_actions.get("START"), Some(&2));
    assert_eq!(summary.effective_actions.get("START"), Some(&1));
    assert_eq!(summary.effective_actions.get("HOLD"), Some(&1));
    assert_eq!(summary.suppressions, 1);
    assert_eq!(
        summary.suppression_reasons.get("duplicate_start_manage_existing"),
        Some(&1)
    );
    assert_eq!(summary.seeds, 1);
    assert_eq!(summary.rebuilds, 0);

    let held = result.curve.iter().find(|p| p.ts == 120_000).unwrap();
    assert_eq!(held.action, Some(PlanAction::Hold));
    assert_eq!(
        held.suppression_reason.as_deref(),
        Some("duplicate_start_manage_existing")
    );
}

#[test]
fn test_result_file_is_written_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/result.json");
    let result = simulate(&sim_config(), &[signed_plan("start")], &dip_bars(), None).unwrap();

    write_result(&path, &result).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["pair"], "ETH/USDT");
    assert_eq!(parsed["curve"].as_array().unwrap().len(), 8);
    assert!(parsed.get("baseline").is_none());
}

// =============================================================================
// Chaos
// =============================================================================

#[test]
fn test_same_seed_replays_byte_identical() {
    let plans = [signed_plan("start"), signed_plan("restart")];
    let profile = chaos("noisy");

    let first = simulate(&sim_config(), &plans, &dip_bars(), Some(&profile)).unwrap();
    let second = simulate(&sim_config(), &plans, &dip_bars(), Some(&profile)).unwrap();

    assert_eq!(first.summary_json().unwrap(), second.summary_json().unwrap());
    assert_eq!(first, second);
    assert!(first.summary.chaos.is_some());
    assert!(first.baseline.is_some());
}

#[test]
fn test_baseline_ignores_chaos_profile() {
    let plans = [signed_plan("start")];
    let plain = simulate(&sim_config(), &plans, &dip_bars(), None).unwrap();
    let noisy = simulate(&sim_config(), &plans, &dip_bars(), Some(&chaos("noisy"))).unwrap();

    let baseline = noisy.baseline.as_ref().unwrap();
    assert_eq!(baseline.fills, plain.summary.fills);
    assert_eq!(baseline.pnl, plain.summary.pnl);
    assert_eq!(noisy.delta.unwrap().pnl, noisy.summary.pnl - plain.summary.pnl);
}

#[test]
fn test_permanent_reject_burst_blocks_all_fills() {
    let result = simulate(
        &sim_config(),
        &[signed_plan("start")],
        &dip_bars(),
        Some(&chaos("reject_everything")),
    )
    .unwrap();

    assert_eq!(result.summary.fills, 0);
    let counters = result.summary.chaos.unwrap();
    assert!(counters.rejected_fills > 0);
    assert_eq!(counters.burst_bars, 8);
    assert_eq!(counters.reject_bursts, 4);

    let baseline_fills = result.baseline.as_ref().unwrap().fills;
    assert!(baseline_fills > 0);
    assert_eq!(result.delta.unwrap().fills, -i64::try_from(baseline_fills).unwrap());
    assert!(
        result
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::ExecFillRejected { .. }))
    );
}

#[test]
fn test_blackout_keeps_curve_but_never_fills() {
    let result = simulate(
        &sim_config(),
        &[signed_plan("start")],
        &dip_bars(),
        Some(&chaos("blackout")),
    )
    .unwrap();

    assert_eq!(result.summary.fills, 0);
    assert_eq!(result.curve.len(), 8);
    assert!(result.curve.iter().all(|p| p.chaos.is_some_and(|c| c.data_gap)));
    assert_eq!(result.summary.chaos.unwrap().data_gaps, 8);
    // The ladder is still seeded; only execution is blinded.
    assert_eq!(result.summary.seeds, 1);
    assert_eq!(result.open_orders.len(), 2);
}

#[test]
fn test_invalid_profile_is_rejected_before_running() {
    let Err(err) = ChaosProfile::from_json(r#"{"seed": 1, "data_gap_probability": 1.5}"#) else {
        panic!("probability above one must be rejected");
    };
    assert!(err.to_string().contains("data_gap_probability"));

    let Err(err) = ChaosProfile::from_json(r#"{"seed": 1, "latency": {"mean": 5}}"#) else {
        panic!("unknown fields must be rejected");
    };
    assert!(err.to_string().contains("mean"));
}
