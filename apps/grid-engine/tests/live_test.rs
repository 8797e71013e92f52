//! Live Executor Integration Tests
//!
//! Runs the per-pair executor against the in-process paper venue with
//! snapshots in a temp directory: restarts, fills that land while the
//! process is down, failed exits and the polling loop.

// Allow unwrap in tests - tests should panic on unexpected errors
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use grid_engine::config::load_config_from_string;
use grid_engine::domain::integrity::plan_hash;
use grid_engine::live::{ExecutorSettings, TickInput};
use grid_engine::{
    Bar, EventKind, PaperExchange, PairExecutor, Plan, PlanAction, PlanWatcher, Side, StateStore, run_pair,
};

// =============================================================================
// Fixtures
// =============================================================================

const PAIR: &str = "ETH/USDT";

const CONFIG_YAML: &str = r#"
ladder:
  tick_size: "0.01"
  qty_step: "0.0001"
  min_notional: "5"
fills:
  fee_rate: "0.001"
retry:
  max_attempts: 2
  initial_backoff_ms: 0
  max_backoff_ms: 0
  jitter_factor: 0.0
reconciliation:
  balance_refresh_ticks: 1
safety:
  failsafe_price_jump_pct: "0.05"
"#;

fn settings() -> ExecutorSettings {
    load_config_from_string(CONFIG_YAML).unwrap().executor_settings()
}

fn start_plan() -> Plan {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures/plans/start.json");
    let mut plan = Plan::from_path(&path).unwrap();
    plan.plan_hash = plan_hash(&plan);
    plan
}

fn stop_plan(reason: &str) -> Plan {
    let mut plan = start_plan();
    plan.plan_id = "plan-eth-0003".to_string();
    plan.decision_seq = 3;
    plan.action = PlanAction::Stop;
    plan.stop_reason = Some(reason.to_string());
    plan.plan_hash = plan_hash(&plan);
    plan
}

fn venue() -> Arc<PaperExchange> {
    Arc::new(PaperExchange::new(PAIR, dec!(1000), dec!(0), dec!(0.001)))
}

async fn executor(dir: &Path, venue: &Arc<PaperExchange>) -> PairExecutor<PaperExchange> {
    PairExecutor::recover(PAIR, Arc::clone(venue), StateStore::new(dir), settings())
        .await
        .unwrap()
}

fn at(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(minute * 60_000).single().unwrap()
}

fn tick(minute: i64, plan: Option<Plan>) -> TickInput {
    TickInput {
        plan,
        now: at(minute),
        ..TickInput::default()
    }
}

// =============================================================================
// Restart
// =============================================================================

#[tokio::test]
async fn test_restart_with_same_plan_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let venue = venue();
    venue.set_price(dec!(104)).await;

    let mut first = executor(dir.path(), &venue).await;
    let report = first.tick(tick(1, Some(start_plan()))).await.unwrap();
    assert_eq!(report.placed, 2);
    let committed = first.state().clone();
    drop(first);

    let mut second = executor(dir.path(), &venue).await;
    assert_eq!(second.state(), &committed);

    let report = second.tick(tick(2, Some(start_plan()))).await.unwrap();
    assert!(!report.plan.unwrap().verdict.is_accept());
    assert_eq!(report.placed, 0);
    assert_eq!(report.canceled, 0);
    assert_eq!(venue.open_order_count().await, 2);
    assert_eq!(second.state().orders, committed.orders);
    assert!(
        report
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::ExecPlanDuplicateIgnored { .. }))
    );
}

#[tokio::test]
async fn test_fills_during_downtime_are_ingested_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let venue = venue();
    venue.set_price(dec!(104)).await;

    let mut first = executor(dir.path(), &venue).await;
    first.tick(tick(1, Some(start_plan()))).await.unwrap();
    drop(first);

    let filled = venue
        .push_bar(&Bar {
            ts: 90_000,
            open: dec!(104),
            high: dec!(104),
            low: dec!(99),
            close: dec!(101),
            volume: None,
        })
        .await;
    assert_eq!(filled, 2);

    let mut second = executor(dir.path(), &venue).await;
    let report = second.tick(tick(2, None)).await.unwrap();

    assert_eq!(report.fills.len(), 2);
    assert!(report.fills.iter().all(|f| f.side == Side::Buy));
    assert_eq!(report.placed, 2);

    let state = second.state();
    assert!(state.orders.iter().all(|o| o.side == Side::Sell));
    let prices: Vec<_> = state.orders.iter().map(|o| o.price).collect();
    assert!(prices.contains(&dec!(102.5)));
    assert!(prices.contains(&dec!(105)));
    assert!(state.last_trade_id.is_some());
    assert_eq!(venue.open_order_count().await, 2);

    // Same trades are not ingested twice.
    let report = second.tick(tick(3, None)).await.unwrap();
    assert!(report.fills.is_empty());
    assert_eq!(report.placed, 0);
}

// =============================================================================
// Exits
// =============================================================================

#[tokio::test]
async fn test_stuck_exit_trips_failsafe_on_price_jump() {
    let dir = tempfile::tempdir().unwrap();
    let venue = venue();
    venue.set_price(dec!(104)).await;
    let mut exec = executor(dir.path(), &venue).await;
    exec.tick(tick(1, Some(start_plan()))).await.unwrap();

    venue.fail_cancels(100).await;
    let report = exec.tick(tick(2, Some(stop_plan("regime_break")))).await.unwrap();
    assert_eq!(report.canceled, 0);
    assert!(exec.state().orders.is_empty());
    assert!(exec.state().pending_exit.is_some());
    assert!(
        report
            .events
            .iter()
            .any(|e| matches!(&e.kind, EventKind::ExecVenueError { operation, .. } if operation == "cancel"))
    );

    venue.set_price(dec!(97.5)).await;
    let report = exec.tick(tick(3, None)).await.unwrap();

    let failsafe = report
        .events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::ExecExitFailsafe { reason, price_move } => Some((reason.clone(), *price_move)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failsafe.0, "failsafe_regime_break");
    assert!(failsafe.1 > dec!(0.05));
    assert!(exec.state().pending_exit.is_none());
    assert_eq!(exec.state().stop_reason.as_deref(), Some("failsafe_regime_break"));
}

#[tokio::test]
async fn test_clean_stop_confirms_exit() {
    let dir = tempfile::tempdir().unwrap();
    let venue = venue();
    venue.set_price(dec!(104)).await;
    let mut exec = executor(dir.path(), &venue).await;
    exec.tick(tick(1, Some(start_plan()))).await.unwrap();

    let report = exec.tick(tick(2, Some(stop_plan("manual")))).await.unwrap();

    assert_eq!(report.canceled, 2);
    assert_eq!(venue.open_order_count().await, 0);
    assert!(exec.state().pending_exit.is_none());
    assert!(
        report
            .events
            .iter()
            .any(|e| matches!(&e.kind, EventKind::ExecExitConfirmed { reason } if reason == "manual"))
    );
}

// =============================================================================
// Polling loop
// =============================================================================

#[tokio::test]
async fn test_run_pair_applies_latest_plan_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = dir.path().join("plans/latest.json");
    std::fs::create_dir_all(plan_path.parent().unwrap()).unwrap();
    std::fs::write(&plan_path, serde_json::to_string(&start_plan()).unwrap()).unwrap();

    let venue = venue();
    venue.set_price(dec!(104)).await;
    let exec = executor(&dir.path().join("state"), &venue).await;
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(run_pair(
        exec,
        PlanWatcher::new(&plan_path),
        Duration::from_millis(10),
        shutdown.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while venue.open_order_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    shutdown.cancel();

    let state = handle.await.unwrap().unwrap();
    assert_eq!(state.orders.len(), 2);
    assert_eq!(state.ledger.last_seq(), Some(1));
    assert!(StateStore::new(dir.path().join("state")).load(PAIR).unwrap().is_some());
}
