//! Logging configuration.

use serde::{Deserialize, Serialize};

use super::default_true;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Observability section; only logging for now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    /// Log subscriber settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Subscriber settings used when `RUST_LOG` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level applied to this crate.
    #[serde(default = "default_level")]
    pub level: String,
    /// Line encoding.
    #[serde(default)]
    pub format: LogFormat,
    /// Attach span context to each line.
    #[serde(default = "default_true")]
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            include_spans: true,
        }
    }
}

impl LoggingConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if !LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(format!(
                "observability.logging.level '{}' must be one of: {LEVELS:?}",
                self.level
            ));
        }
        Ok(())
    }
}

fn default_level() -> String {
    "info".to_string()
}
