//! Configuration module for the grid engine.
//!
//! Loads a YAML file with `${VAR}` / `${VAR:-default}` environment
//! interpolation, applies per-field defaults and validates the result.
//! Every section may be omitted.
//!
//! # Usage
//!
//! ```rust,ignore
//! use grid_engine::config::load_config;
//!
//! let config = load_config(Some("config.yaml"))?;
//! let settings = config.executor_settings();
//! println!("poll every {} ms", config.plans.poll_interval_ms);
//! ```

mod fills;
mod ladder;
mod live;
mod observability;
mod persistence;
mod plans;
mod reconciliation;
mod replay;
mod safety;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fills::FillsConfig;
pub use ladder::LadderConfig;
pub use live::{LiveConfig, LivePairConfig};
pub use observability::{LogFormat, LoggingConfig, ObservabilityConfig};
pub use persistence::PersistenceConfig;
pub use plans::PlansConfig;
pub use reconciliation::{PlacementConfig, ReconciliationConfig};
pub use replay::ReplayConfig;
pub use safety::SafetyConfig;

use crate::domain::core::CoreParams;
use crate::exchange::RetryPolicy;
use crate::live::ExecutorSettings;
use crate::replay::SimulationConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Ladder sizing.
    #[serde(default)]
    pub ladder: LadderConfig,
    /// Fees and stop-outs.
    #[serde(default)]
    pub fills: FillsConfig,
    /// Reconciliation and placement.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Retry policy for venue calls.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Reject-burst and failsafe thresholds.
    #[serde(default)]
    pub safety: SafetyConfig,
    /// State snapshots.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Plan input.
    #[serde(default)]
    pub plans: PlansConfig,
    /// Live pairs.
    #[serde(default)]
    pub live: LiveConfig,
    /// Replay inputs.
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Decision core parameters shared by both modes.
    #[must_use]
    pub const fn core_params(&self) -> CoreParams {
        CoreParams {
            ladder: self.ladder.to_ladder_params(),
            fee_rate: self.fills.fee_rate,
            soft_adjust_tolerance_steps: self.ladder.soft_adjust_tolerance_steps,
            stop_out_range_steps: self.fills.stop_out_range_steps,
            flatten_on_stop: self.fills.flatten_on_stop,
            dust_quantity: self.fills.dust_quantity,
            plan_id_history: self.plans.plan_id_history,
        }
    }

    /// Settings for a live executor.
    #[must_use]
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            core: self.core_params(),
            reconcile: self.reconciliation.to_reconcile_params(self.ladder.tick_size),
            retry: self.retry.clone(),
            placement: self.reconciliation.placement.to_placement_policy(),
            safety: self.safety.to_safety_params(),
            balance_refresh_ticks: self.reconciliation.balance_refresh_ticks,
            flatten_slippage_bps: self.safety.flatten_slippage_bps,
        }
    }

    /// Inputs for a replay run.
    #[must_use]
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            pair: self.replay.pair.clone(),
            initial_quote: self.replay.initial_quote,
            initial_base: self.replay.initial_base,
            core: self.core_params(),
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    // An empty or comment-only document means "all defaults".
    let config: Config = if interpolated.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    }) {
        Config::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        }
    })
    .into_owned()
}

/// Validate configuration values.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config
        .ladder
        .validate()
        .and_then(|()| config.fills.validate())
        .and_then(|()| config.reconciliation.validate())
        .and_then(|()| validate_retry(&config.retry))
        .and_then(|()| config.safety.validate())
        .and_then(|()| config.plans.validate())
        .and_then(|()| config.live.validate())
        .and_then(|()| config.replay.validate())
        .and_then(|()| config.observability.logging.validate())
        .map_err(ConfigError::ValidationError)
}

fn validate_retry(retry: &RetryPolicy) -> Result<(), String> {
    if retry.max_attempts == 0 {
        return Err("retry.max_attempts must be at least 1".to_string());
    }
    if retry.backoff_multiplier < 1.0 {
        return Err("retry.backoff_multiplier must be at least 1.0".to_string());
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err("retry.jitter_factor must be between 0.0 and 1.0".to_string());
    }
    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err("retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string());
    }
    Ok(())
}

pub(crate) const fn default_true() -> bool {
    true
}
