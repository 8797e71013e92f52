//! Grid Engine binary.
//!
//! Environment:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `GRID_CONFIG` | YAML config path | `config.yaml` when present, else built-in defaults |
//! | `GRID_MODE` | `replay` or `live` | `replay` |
//! | `GRID_BARS` | price history (`.json`, `.jsonl`, `.ndjson`) | `replay.bars_path` |
//! | `GRID_CHAOS_PROFILE` | chaos profile JSON (replay only) | `replay.chaos_profile` |
//! | `GRID_OUTPUT` | simulation result path | `replay.output_path` |
//!
//! Live mode runs every configured pair against an in-process paper venue
//! whose price follows `GRID_BARS`, one bar per poll interval.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use grid_engine::config::{Config, load_config, validate_config};
use grid_engine::domain::fills::Bar;
use grid_engine::exchange::PaperExchange;
use grid_engine::live::{PairExecutor, PlanWatcher, run_pairs};
use grid_engine::observability::init_tracing;
use grid_engine::replay::{ChaosProfile, load_bars, simulate, write_result};
use grid_engine::state::StateStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let mut config = parse_config()?;
    init_tracing(&config.observability.logging).map_err(|e| -> Box<dyn std::error::Error> { e })?;
    apply_env_overrides(&mut config);

    let mode = std::env::var("GRID_MODE").unwrap_or_else(|_| "replay".to_string());
    tracing::info!(mode = %mode, "Starting Grid Engine");

    match mode.to_lowercase().as_str() {
        "replay" => run_replay(&config),
        "live" => run_live(&config).await,
        other => Err(format!("GRID_MODE must be 'replay' or 'live', got '{other}'").into()),
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Config from `GRID_CONFIG`, `./config.yaml`, or defaults.
fn parse_config() -> Result<Config, Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var("GRID_CONFIG") {
        return Ok(load_config(Some(&path))?);
    }
    if Path::new("config.yaml").exists() {
        return Ok(load_config(None)?);
    }
    let config = Config::default();
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(path) = std::env::var("GRID_BARS") {
        config.replay.bars_path = Some(path);
    }
    if let Ok(path) = std::env::var("GRID_CHAOS_PROFILE") {
        config.replay.chaos_profile = Some(path);
    }
    if let Ok(path) = std::env::var("GRID_OUTPUT") {
        config.replay.output_path = path;
    }
}

fn load_history(config: &Config) -> Result<Vec<Bar>, Box<dyn std::error::Error>> {
    let path = config
        .replay
        .bars_path
        .as_deref()
        .ok_or("price history required: set GRID_BARS or replay.bars_path")?;
    Ok(load_bars(Path::new(path))?)
}

fn run_replay(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let bars = load_history(config)?;
    // Profiles are validated before anything runs.
    let chaos = config
        .replay
        .chaos_profile
        .as_deref()
        .map(|p| ChaosProfile::from_path(Path::new(p)))
        .transpose()?;
    let plans = config.plans.store(None).load_sequence(Some(&config.replay.pair))?;
    tracing::info!(
        pair = %config.replay.pair,
        plans = plans.len(),
        bars = bars.len(),
        chaos_seed = ?chaos.map(|c| c.seed),
        "Replay inputs loaded"
    );

    let result = simulate(&config.simulation_config(), &plans, &bars, chaos.as_ref())?;
    write_result(Path::new(&config.replay.output_path), &result)?;
    tracing::info!(output = %config.replay.output_path, "Simulation result written");
    println!("{}", result.summary_json()?);
    Ok(())
}

async fn run_live(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let bars = load_history(config)?;
    let first = *bars.first().ok_or("price history is empty")?;
    let interval = Duration::from_millis(config.plans.poll_interval_ms);
    let shutdown = CancellationToken::new();

    let mut venues = Vec::new();
    let mut pairs = Vec::new();
    for pair in &config.live.pairs {
        let venue = Arc::new(PaperExchange::new(
            pair.pair.clone(),
            pair.paper_quote,
            pair.paper_base,
            config.fills.fee_rate,
        ));
        venue.set_price(first.open).await;
        let store = StateStore::new(&config.persistence.state_dir);
        let executor =
            PairExecutor::recover(&pair.pair, Arc::clone(&venue), store, config.executor_settings()).await?;
        let watcher = PlanWatcher::new(config.plans.store(pair.plan_dir.as_deref()).latest_path());
        venues.push(venue);
        pairs.push((executor, watcher));
    }

    let feeder = tokio::spawn(feed_bars(venues, bars, interval, shutdown.clone()));
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    tracing::info!(pairs = pairs.len(), "Grid engine ready");
    let results = run_pairs(pairs, interval, shutdown.clone()).await;
    shutdown.cancel();
    let _ = feeder.await;

    let mut failed = 0;
    for (pair, result) in results {
        match result {
            Ok(state) => tracing::info!(
                pair = %pair,
                orders = state.orders.len(),
                quote = %state.balances.quote_total,
                base = %state.balances.base_total,
                "Pair stopped"
            ),
            Err(e) => {
                failed += 1;
                tracing::error!(pair = %pair, error = %e, "Pair failed");
            }
        }
    }
    tracing::info!("Grid engine stopped");
    if failed > 0 {
        return Err(format!("{failed} pair(s) failed").into());
    }
    Ok(())
}

/// Advance every paper venue one bar per interval; hold the last price
/// once history runs out.
async fn feed_bars(venues: Vec<Arc<PaperExchange>>, bars: Vec<Bar>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    for bar in &bars {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        for venue in &venues {
            let filled = venue.push_bar(bar).await;
            if filled > 0 {
                tracing::debug!(ts = bar.ts, filled, "Paper venue filled orders");
            }
        }
    }
    tracing::info!("Price history exhausted; holding last price");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. A process that cannot
/// hear termination signals should fail at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
