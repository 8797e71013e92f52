//! Engine error taxonomy.
//!
//! Module errors are aggregated into [`EngineError`]; [`ErrorClass`] tells a
//! caller how to react.
//!
//! | Class | Examples | Handling |
//! |-------|----------|----------|
//! | `Input` | malformed plan, invalid chaos profile, unsupported bar file | fatal for that plan or run |
//! | `Integrity` | hash mismatch, stale sequence, duplicate id | plan rejected, engine continues |
//! | `Venue` | network failure, exhausted retries | tick not committed, loop continues |
//! | `Safety` | reject burst, exit failsafe | escalated through events |
//! | `Persistence` | snapshot write failed | tick not committed |
//! | `Config` | unreadable or invalid config | fatal at startup |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::plan::PlanError;
use crate::exchange::ExchangeError;
use crate::replay::{BarLoadError, ChaosProfileError, SimulationError};
use crate::state::PersistenceError;

/// Coarse error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input artifact.
    Input,
    /// Plan failed integrity checks.
    Integrity,
    /// Venue or transport failure.
    Venue,
    /// Safety escalation.
    Safety,
    /// Snapshot I/O.
    Persistence,
    /// Configuration.
    Config,
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Plan could not be read or is structurally invalid.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Chaos profile rejected.
    #[error(transparent)]
    ChaosProfile(#[from] ChaosProfileError),

    /// Price history rejected.
    #[error(transparent)]
    Bars(#[from] BarLoadError),

    /// Replay inputs rejected.
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// Plan rejected by the integrity verifier.
    #[error("Plan {plan_id} rejected: {verdict}")]
    Integrity {
        /// Plan id.
        plan_id: String,
        /// Verdict label.
        verdict: String,
    },

    /// Venue call failed.
    #[error("Venue error during {operation}: {source}")]
    Venue {
        /// Operation name.
        operation: String,
        /// Underlying error.
        source: ExchangeError,
    },

    /// Safety rule tripped.
    #[error("Safety fault: {reason}")]
    Safety {
        /// Reason code.
        reason: String,
    },

    /// Snapshot I/O failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Configuration invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Venue error for an operation.
    #[must_use]
    pub fn venue(operation: impl Into<String>, source: ExchangeError) -> Self {
        Self::Venue {
            operation: operation.into(),
            source,
        }
    }

    /// Class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Plan(_) | Self::ChaosProfile(_) | Self::Bars(_) | Self::Simulation(_) => {
                ErrorClass::Input
            }
            Self::Integrity { .. } => ErrorClass::Integrity,
            Self::Venue { .. } => ErrorClass::Venue,
            Self::Safety { .. } => ErrorClass::Safety,
            Self::Persistence(_) => ErrorClass::Persistence,
            Self::Config(_) => ErrorClass::Config,
        }
    }

    /// Whether the control loop keeps running after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Integrity | ErrorClass::Venue | ErrorClass::Safety | ErrorClass::Persistence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_errors_are_recoverable() {
        let err = EngineError::venue("fetch_last_price", ExchangeError::RateLimited);
        assert_eq!(err.class(), ErrorClass::Venue);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("fetch_last_price"));
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err = EngineError::from(ConfigError::ValidationError("bad".to_string()));
        assert_eq!(err.class(), ErrorClass::Config);
        assert!(!err.is_recoverable());
    }
}
