//! State persistence configuration.

use serde::{Deserialize, Serialize};

/// Where per-pair execution state snapshots live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory of `<pair>.json` snapshots.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> String {
    "./data/state".to_string()
}
