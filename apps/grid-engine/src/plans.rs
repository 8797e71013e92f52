//! Plan directory access.
//!
//! The planner writes the current plan to a well-known file (`latest.json`
//! by default) and keeps timestamped `*.json` snapshots next to it.
//! [`PlanStore::load_sequence`] merges both into the time-ordered sequence
//! replay consumes; [`PlanSchedule`] releases them bar by bar.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::plan::{Plan, PlanError};

/// Read-only view of a plan directory.
#[derive(Debug, Clone)]
pub struct PlanStore {
    dir: PathBuf,
    latest_name: String,
}

impl PlanStore {
    /// Store over `dir` with the given latest-file name.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, latest_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            latest_name: latest_name.into(),
        }
    }

    /// Path of the latest-plan file.
    #[must_use]
    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(&self.latest_name)
    }

    /// Current plan, if the latest file exists.
    pub fn latest(&self) -> Result<Option<Plan>, PlanError> {
        let path = self.latest_path();
        if !path.exists() {
            return Ok(None);
        }
        Plan::from_path(&path).map(Some)
    }

    /// Every plan in the directory for `pair` (all pairs when `None`),
    /// de-duplicated by `plan_id` and ordered by
    /// `(decision_seq, generated_at)`.
    ///
    /// Any unreadable or invalid file fails the whole load.
    pub fn load_sequence(&self, pair: Option<&str>) -> Result<Vec<Plan>, PlanError> {
        let mut paths = json_files(&self.dir)?;
        // Latest first so its copy wins over an identical archive snapshot.
        let latest = OsStr::new(&self.latest_name);
        paths.sort_by_key(|p| (p.file_name() != Some(latest), p.clone()));

        let mut seen = HashSet::new();
        let mut plans = Vec::new();
        for path in paths {
            let plan = Plan::from_path(&path)?;
            if pair.is_some_and(|pair| plan.pair != pair) {
                continue;
            }
            if !seen.insert(plan.plan_id.clone()) {
                debug!(plan_id = %plan.plan_id, path = %path.display(), "Duplicate plan snapshot skipped");
                continue;
            }
            plans.push(plan);
        }
        plans.sort_by(|a, b| {
            (a.decision_seq, a.generated_at, &a.plan_id).cmp(&(b.decision_seq, b.generated_at, &b.plan_id))
        });
        Ok(plans)
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>, PlanError> {
    let io_err = |source| PlanError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Plans released as bars advance.
///
/// A plan becomes due on the first bar whose timestamp is at or after its
/// `valid_for_candle_ts`. Plans are released in sequence order, so a plan
/// never overtakes one with a lower `decision_seq`.
#[derive(Debug, Clone, Default)]
pub struct PlanSchedule {
    queue: VecDeque<Plan>,
}

impl PlanSchedule {
    /// Schedule over an already ordered sequence.
    #[must_use]
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            queue: plans.into(),
        }
    }

    /// Plans due at `candle_ts`, in order.
    pub fn due(&mut self, candle_ts: i64) -> Vec<Plan> {
        let mut due = Vec::new();
        while self
            .queue
            .front()
            .is_some_and(|p| p.valid_for_candle_ts <= candle_ts)
        {
            if let Some(plan) = self.queue.pop_front() {
                due.push(plan);
            }
        }
        due
    }

    /// Plans not yet released.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::PlanAction;
    use crate::domain::plan::fixtures::plan;

    fn write(dir: &Path, name: &str, plan: &Plan) {
        std::fs::write(dir.join(name), serde_json::to_string_pretty(plan).unwrap()).unwrap();
    }

    #[test]
    fn test_sequence_merges_dedupes_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = plan("p-1", 1, PlanAction::Start);
        let p2 = plan("p-2", 2, PlanAction::Hold);
        let mut other = plan("q-1", 1, PlanAction::Start);
        other.pair = "BTC/USDT".to_string();

        write(dir.path(), "20250101T000500Z.json", &p2);
        write(dir.path(), "20250101T000000Z.json", &p1);
        write(dir.path(), "latest.json", &p2);
        write(dir.path(), "btc.json", &other);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = PlanStore::new(dir.path(), "latest.json");
        let plans = store.load_sequence(Some("ETH/USDT")).unwrap();
        let ids: Vec<&str> = plans.iter().map(|p| p.plan_id.as_str()).collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
        assert_eq!(store.load_sequence(None).unwrap().len(), 3);
        assert_eq!(store.latest().unwrap().unwrap().plan_id, "p-2");
    }

    #[test]
    fn test_invalid_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), r#"{"plan_id": "x"}"#).unwrap();
        let store = PlanStore::new(dir.path(), "latest.json");
        assert!(matches!(store.load_sequence(None), Err(PlanError::Parse(_))));
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn test_schedule_releases_by_candle_ts() {
        let mut a = plan("a", 1, PlanAction::Start);
        a.valid_for_candle_ts = 60_000;
        let mut b = plan("b", 2, PlanAction::Hold);
        b.valid_for_candle_ts = 180_000;
        let mut schedule = PlanSchedule::new(vec![a, b]);

        assert!(schedule.due(0).is_empty());
        assert_eq!(schedule.due(60_000).len(), 1);
        assert!(schedule.due(120_000).is_empty());
        assert_eq!(schedule.due(240_000)[0].plan_id, "b");
        assert_eq!(schedule.remaining(), 0);
    }
}
