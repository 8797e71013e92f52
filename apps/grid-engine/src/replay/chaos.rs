//! Seeded fault injection for replay.
//!
//! A [`ChaosProfile`] describes the faults; a [`ChaosInjector`] owns the
//! `ChaCha8Rng` seeded from it and turns the profile into per-bar and
//! per-fill decisions. Draws happen in a fixed order regardless of which
//! faults are enabled, so the stream position after N bars depends only on
//! the seed and the number of bars and fill attempts.
//!
//! | Per bar (in order)        | Distribution                 |
//! |---------------------------|------------------------------|
//! | latency                   | normal(`mean_ms`, `std_ms`)  |
//! | spread-shock trigger      | uniform [0, 1)               |
//! | spread-shock magnitude    | \|normal(`mean_bps`, `std_bps`)\| |
//! | data gap                  | uniform [0, 1)               |
//! | missing candle            | uniform [0, 1)               |
//! | delayed candle            | uniform [0, 1)               |
//! | reject-burst trigger      | uniform [0, 1)               |
//! | reject-burst duration     | uniform `min_bars..=max_bars`|
//!
//! Per fill attempt: partial trigger, then partial ratio.

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a chaos profile.
#[derive(Debug, Error)]
pub enum ChaosProfileError {
    /// File could not be read.
    #[error("failed to read chaos profile {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON did not match the schema.
    #[error("failed to parse chaos profile: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid chaos profile field {field}: {message}")]
    Invalid {
        /// Offending field path.
        field: &'static str,
        /// What is wrong.
        message: String,
    },
}

/// Latency model. A bar whose drawn latency exceeds the fill window gets
/// no fill detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatencyProfile {
    /// Mean latency in milliseconds.
    #[serde(default)]
    pub mean_ms: f64,
    /// Standard deviation in milliseconds.
    #[serde(default)]
    pub std_ms: f64,
    /// Latency above this blocks fills for the bar.
    #[serde(default = "default_fill_window_ms")]
    pub fill_window_ms: f64,
}

const fn default_fill_window_ms() -> f64 {
    1_000.0
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            mean_ms: 0.0,
            std_ms: 0.0,
            fill_window_ms: default_fill_window_ms(),
        }
    }
}

/// Spread shock: shifts trigger prices against the order by a number of
/// basis points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpreadShockProfile {
    /// Chance per bar.
    #[serde(default)]
    pub probability: f64,
    /// Mean shock in bps.
    #[serde(default)]
    pub mean_bps: f64,
    /// Standard deviation in bps.
    #[serde(default)]
    pub std_bps: f64,
}

/// Partial fills: a triggered fill executes only a ratio of what remains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialFillProfile {
    /// Chance per fill attempt.
    #[serde(default)]
    pub probability: f64,
    /// Smallest ratio.
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,
    /// Largest ratio.
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,
}

const fn default_min_ratio() -> f64 {
    0.5
}

const fn default_max_ratio() -> f64 {
    1.0
}

impl Default for PartialFillProfile {
    fn default() -> Self {
        Self {
            probability: 0.0,
            min_ratio: default_min_ratio(),
            max_ratio: default_max_ratio(),
        }
    }
}

/// Reject bursts: once triggered, fills are rejected for a random number of
/// bars and orders stay open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectBurstProfile {
    /// Chance per bar while no burst is active.
    #[serde(default)]
    pub probability: f64,
    /// Shortest burst in bars.
    #[serde(default = "default_burst_bars")]
    pub min_bars: u32,
    /// Longest burst in bars.
    #[serde(default = "default_burst_bars")]
    pub max_bars: u32,
}

const fn default_burst_bars() -> u32 {
    1
}

impl Default for RejectBurstProfile {
    fn default() -> Self {
        Self {
            probability: 0.0,
            min_bars: default_burst_bars(),
            max_bars: default_burst_bars(),
        }
    }
}

/// Fault profile for one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChaosProfile {
    /// Seed for the run's random stream.
    pub seed: u64,
    /// Latency model.
    #[serde(default)]
    pub latency: LatencyProfile,
    /// Spread shock model.
    #[serde(default)]
    pub spread_shock: SpreadShockProfile,
    /// Partial fill model.
    #[serde(default)]
    pub partial_fill: PartialFillProfile,
    /// Reject burst model.
    #[serde(default)]
    pub reject_burst: RejectBurstProfile,
    /// Chance a bar arrives one bar late.
    #[serde(default)]
    pub delayed_candle_probability: f64,
    /// Chance a bar never arrives.
    #[serde(default)]
    pub missing_candle_probability: f64,
    /// Chance a bar arrives but is unusable for fills.
    #[serde(default)]
    pub data_gap_probability: f64,
}

impl ChaosProfile {
    /// Profile that injects nothing. Used for the baseline run.
    #[must_use]
    pub fn disabled(seed: u64) -> Self {
        Self {
            seed,
            latency: LatencyProfile::default(),
            spread_shock: SpreadShockProfile::default(),
            partial_fill: PartialFillProfile::default(),
            reject_burst: RejectBurstProfile::default(),
            delayed_candle_probability: 0.0,
            missing_candle_probability: 0.0,
            data_gap_probability: 0.0,
        }
    }

    /// Parse and validate a profile.
    pub fn from_json(text: &str) -> Result<Self, ChaosProfileError> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Read, parse and validate a profile file.
    pub fn from_path(path: &Path) -> Result<Self, ChaosProfileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ChaosProfileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Range checks.
    pub fn validate(&self) -> Result<(), ChaosProfileError> {
        probability("spread_shock.probability", self.spread_shock.probability)?;
        probability("partial_fill.probability", self.partial_fill.probability)?;
        probability("reject_burst.probability", self.reject_burst.probability)?;
        probability("delayed_candle_probability", self.delayed_candle_probability)?;
        probability("missing_candle_probability", self.missing_candle_probability)?;
        probability("data_gap_probability", self.data_gap_probability)?;

        non_negative("latency.mean_ms", self.latency.mean_ms)?;
        non_negative("latency.std_ms", self.latency.std_ms)?;
        non_negative("latency.fill_window_ms", self.latency.fill_window_ms)?;
        non_negative("spread_shock.std_bps", self.spread_shock.std_bps)?;
        if !self.spread_shock.mean_bps.is_finite() {
            return Err(invalid("spread_shock.mean_bps", "must be finite"));
        }

        let partial = &self.partial_fill;
        if !(partial.min_ratio > 0.0 && partial.min_ratio <= partial.max_ratio && partial.max_ratio <= 1.0) {
            return Err(invalid(
                "partial_fill.min_ratio",
                format!(
                    "ratio range must satisfy 0 < min <= max <= 1, got [{}, {}]",
                    partial.min_ratio, partial.max_ratio
                ),
            ));
        }

        let burst = &self.reject_burst;
        if burst.min_bars == 0 || burst.min_bars > burst.max_bars {
            return Err(invalid(
                "reject_burst.min_bars",
                format!(
                    "bar range must satisfy 1 <= min <= max, got [{}, {}]",
                    burst.min_bars, burst.max_bars
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ChaosProfileError {
    ChaosProfileError::Invalid {
        field,
        message: message.into(),
    }
}

fn probability(field: &'static str, value: f64) -> Result<(), ChaosProfileError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("must be within [0, 1], got {value}")))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ChaosProfileError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be finite and >= 0, got {value}")))
    }
}

/// Faults decided for one input bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarChaos {
    /// Drawn latency, whole milliseconds.
    pub latency_ms: i64,
    /// Latency exceeded the fill window.
    pub latency_blocked: bool,
    /// Spread shock in bps (zero when not triggered).
    pub shock_bps: Decimal,
    /// Bar unusable for fills.
    pub data_gap: bool,
    /// Bar dropped entirely.
    pub missing: bool,
    /// Bar released one bar late.
    pub delayed: bool,
    /// Burst started on this bar, with its length.
    pub burst_started: Option<u32>,
}

/// Fault counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosCounters {
    /// Bars whose fills were blocked by latency.
    pub latency_blocked_bars: u64,
    /// Bars with a spread shock.
    pub spread_shocks: u64,
    /// Bars marked as data gaps.
    pub data_gaps: u64,
    /// Bars dropped.
    pub missing_candles: u64,
    /// Bars delayed.
    pub delayed_candles: u64,
    /// Bursts started.
    pub reject_bursts: u64,
    /// Bars spent inside a burst.
    pub burst_bars: u64,
    /// Fill attempts rejected by a burst.
    pub rejected_fills: u64,
    /// Fills executed partially.
    pub partial_fills: u64,
}

/// Seeded fault source for one run.
#[derive(Debug, Clone)]
pub struct ChaosInjector {
    profile: ChaosProfile,
    rng: ChaCha8Rng,
    latency: Normal<f64>,
    shock: Normal<f64>,
    burst_remaining: u32,
    counters: ChaosCounters,
}

impl ChaosInjector {
    /// Injector seeded from `profile.seed`. The profile is validated first.
    pub fn new(profile: ChaosProfile) -> Result<Self, ChaosProfileError> {
        profile.validate()?;
        let latency = Normal::new(profile.latency.mean_ms, profile.latency.std_ms)
            .map_err(|e| invalid("latency", e.to_string()))?;
        let shock = Normal::new(profile.spread_shock.mean_bps, profile.spread_shock.std_bps)
            .map_err(|e| invalid("spread_shock", e.to_string()))?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(profile.seed),
            profile,
            latency,
            shock,
            burst_remaining: 0,
            counters: ChaosCounters::default(),
        })
    }

    /// Profile in use.
    #[must_use]
    pub const fn profile(&self) -> &ChaosProfile {
        &self.profile
    }

    /// Counters so far.
    #[must_use]
    pub const fn counters(&self) -> &ChaosCounters {
        &self.counters
    }

    /// Mutable counters; the simulator books outcomes it observes.
    pub fn counters_mut(&mut self) -> &mut ChaosCounters {
        &mut self.counters
    }

    /// Decide the faults for the next input bar.
    pub fn draw_bar(&mut self) -> BarChaos {
        let latency: f64 = self.latency.sample(&mut self.rng);
        let shock_roll: f64 = self.rng.random();
        let shock_magnitude: f64 = self.shock.sample(&mut self.rng).abs();
        let gap_roll: f64 = self.rng.random();
        let missing_roll: f64 = self.rng.random();
        let delayed_roll: f64 = self.rng.random();
        let burst_roll: f64 = self.rng.random();
        let burst_len = self
            .rng
            .random_range(self.profile.reject_burst.min_bars..=self.profile.reject_burst.max_bars);

        let latency = latency.max(0.0);
        let shocked = shock_roll < self.profile.spread_shock.probability;
        let burst_started =
            (self.burst_remaining == 0 && burst_roll < self.profile.reject_burst.probability).then_some(burst_len);
        if let Some(len) = burst_started {
            self.burst_remaining = len;
            self.counters.reject_bursts += 1;
        }

        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = latency.round() as i64;
        BarChaos {
            latency_ms,
            latency_blocked: latency > self.profile.latency.fill_window_ms,
            shock_bps: if shocked {
                Decimal::from_f64(shock_magnitude).unwrap_or_default().round_dp(4)
            } else {
                Decimal::ZERO
            },
            data_gap: gap_roll < self.profile.data_gap_probability,
            missing: missing_roll < self.profile.missing_candle_probability,
            delayed: delayed_roll < self.profile.delayed_candle_probability,
            burst_started,
        }
    }

    /// Whether fills are currently rejected.
    #[must_use]
    pub const fn in_burst(&self) -> bool {
        self.burst_remaining > 0
    }

    /// Consume one bar of the active burst.
    pub fn end_bar(&mut self) {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            self.counters.burst_bars += 1;
        }
    }

    /// Ratio of the remaining quantity to execute, or `None` for a full
    /// fill. Both draws happen on every call.
    pub fn draw_partial(&mut self) -> Option<Decimal> {
        let trigger: f64 = self.rng.random();
        let unit: f64 = self.rng.random();
        if trigger >= self.profile.partial_fill.probability {
            return None;
        }
        let PartialFillProfile { min_ratio, max_ratio, .. } = self.profile.partial_fill;
        let ratio = unit.mul_add(max_ratio - min_ratio, min_ratio);
        Decimal::from_f64(ratio).map(|r| r.round_dp(6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(seed: u64) -> ChaosProfile {
        ChaosProfile::from_json(&format!(
            r#"{{
                "seed": {seed},
                "latency": {{"mean_ms": 200, "std_ms": 150, "fill_window_ms": 300}},
                "spread_shock": {{"probability": 0.3, "mean_bps": 10, "std_bps": 5}},
                "partial_fill": {{"probability": 0.5, "min_ratio": 0.2, "max_ratio": 0.8}},
                "reject_burst": {{"probability": 0.1, "min_bars": 2, "max_bars": 4}},
                "delayed_candle_probability": 0.1,
                "missing_candle_probability": 0.05,
                "data_gap_probability": 0.05
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = ChaosInjector::new(noisy(7)).unwrap();
        let mut b = ChaosInjector::new(noisy(7)).unwrap();
        for _ in 0..200 {
            assert_eq!(a.draw_bar(), b.draw_bar());
            assert_eq!(a.draw_partial(), b.draw_partial());
            a.end_bar();
            b.end_bar();
        }
        assert_eq!(a.counters(), b.counters());
    }

    #[test]
    fn test_different_seed_diverges() {
        let mut a = ChaosInjector::new(noisy(1)).unwrap();
        let mut b = ChaosInjector::new(noisy(2)).unwrap();
        let draws_a: Vec<BarChaos> = (0..50).map(|_| a.draw_bar()).collect();
        let draws_b: Vec<BarChaos> = (0..50).map(|_| b.draw_bar()).collect();
        assert_ne!(draws_a, draws_b);
    }

    #[test]
    fn test_disabled_profile_injects_nothing() {
        let mut chaos = ChaosInjector::new(ChaosProfile::disabled(3)).unwrap();
        for _ in 0..100 {
            let bar = chaos.draw_bar();
            assert!(!bar.latency_blocked && !bar.data_gap && !bar.missing && !bar.delayed);
            assert_eq!(bar.shock_bps, Decimal::ZERO);
            assert!(bar.burst_started.is_none());
            assert!(chaos.draw_partial().is_none());
        }
    }

    #[test]
    fn test_certain_burst_covers_every_bar() {
        let mut profile = ChaosProfile::disabled(9);
        profile.reject_burst.probability = 1.0;
        let mut chaos = ChaosInjector::new(profile).unwrap();
        for _ in 0..20 {
            chaos.draw_bar();
            assert!(chaos.in_burst());
            chaos.end_bar();
        }
        assert_eq!(chaos.counters().reject_bursts, 20);
    }

    #[test]
    fn test_partial_ratio_within_range() {
        let mut profile = ChaosProfile::disabled(11);
        profile.partial_fill = PartialFillProfile {
            probability: 1.0,
            min_ratio: 0.25,
            max_ratio: 0.75,
        };
        let mut chaos = ChaosInjector::new(profile).unwrap();
        for _ in 0..100 {
            let ratio = chaos.draw_partial().unwrap();
            assert!(ratio >= Decimal::new(25, 2) && ratio <= Decimal::new(75, 2));
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let Err(err) = ChaosProfile::from_json(r#"{"seed": 1, "latencyy": {}}"#) else {
            panic!("unknown field accepted");
        };
        assert!(matches!(err, ChaosProfileError::Parse(_)));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let cases = [
            r#"{"seed": 1, "data_gap_probability": 1.5}"#,
            r#"{"seed": 1, "latency": {"std_ms": -1}}"#,
            r#"{"seed": 1, "partial_fill": {"probability": 0.5, "min_ratio": 0.9, "max_ratio": 0.1}}"#,
            r#"{"seed": 1, "reject_burst": {"probability": 0.5, "min_bars": 0, "max_bars": 2}}"#,
        ];
        for case in cases {
            assert!(
                matches!(ChaosProfile::from_json(case), Err(ChaosProfileError::Invalid { .. })),
                "accepted {case}"
            );
        }
        assert!(ChaosProfile::from_json(r#"{"seed": 5}"#).is_ok());
    }
}
