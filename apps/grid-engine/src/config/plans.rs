//! Plan input configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::plans::PlanStore;

/// Plan directory layout and polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlansConfig {
    /// Directory holding the latest plan and its archive snapshots.
    #[serde(default = "default_plans_dir")]
    pub dir: String,
    /// File name of the latest plan.
    #[serde(default = "default_latest_name")]
    pub latest_name: String,
    /// How often the live loop polls the latest plan, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Accepted plan ids remembered per pair.
    #[serde(default = "default_plan_id_history")]
    pub plan_id_history: usize,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            dir: default_plans_dir(),
            latest_name: default_latest_name(),
            poll_interval_ms: default_poll_interval_ms(),
            plan_id_history: default_plan_id_history(),
        }
    }
}

impl PlansConfig {
    /// Store over `dir`, or over the configured directory.
    #[must_use]
    pub fn store(&self, dir: Option<&str>) -> PlanStore {
        PlanStore::new(Path::new(dir.unwrap_or(&self.dir)), self.latest_name.clone())
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.latest_name)
            .extension()
            .is_some_and(|e| e == "json")
        {
            return Err("plans.latest_name must be a .json file name".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("plans.poll_interval_ms must be positive".to_string());
        }
        if self.plan_id_history == 0 {
            return Err("plans.plan_id_history must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_plans_dir() -> String {
    "./data/plans".to_string()
}

fn default_latest_name() -> String {
    "latest.json".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_plan_id_history() -> usize {
    256
}
