//! Logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate only. Engine events are mirrored to `tracing` with their `code`
//! field by [`EventLog`](crate::domain::events::EventLog), so these logs and
//! the event log agree.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Error returned when a global subscriber is already installed.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Filter directive used when `RUST_LOG` is unset.
#[must_use]
pub fn default_directive(config: &LoggingConfig) -> String {
    format!("grid_engine={}", config.level)
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(config)))
}

/// Install the global subscriber in the configured format.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), InitError> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
    match config.format {
        LogFormat::Pretty => builder.pretty().with_target(config.include_spans).try_init(),
        LogFormat::Json => builder
            .json()
            .with_current_span(config.include_spans)
            .with_span_list(config.include_spans)
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_to_crate() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(default_directive(&config), "grid_engine=debug");
        assert_eq!(default_directive(&LoggingConfig::default()), "grid_engine=info");
    }
}
