//! Control loops.
//!
//! [`run_pair`] drives one executor: poll the plan file, tick, repeat, until
//! the shutdown token fires. A tick in flight at shutdown is dropped, which
//! leaves the last committed state in place. [`run_pairs`] hosts several
//! pairs in a `JoinSet`; pairs share nothing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{PairExecutor, TickInput};
use crate::domain::plan::{Plan, PlanError};
use crate::error::EngineError;
use crate::exchange::ExchangePort;
use crate::state::ExecutionState;

/// Watches a plan file and yields its content only when it changes.
#[derive(Debug, Clone)]
pub struct PlanWatcher {
    path: PathBuf,
    last_digest: Option<String>,
}

impl PlanWatcher {
    /// Watch `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_digest: None,
        }
    }

    /// Watched path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// New plan since the last poll, if any.
    ///
    /// A missing file is not an error. An unreadable or invalid file is
    /// reported once per distinct content.
    pub fn poll(&mut self) -> Result<Option<Plan>, PlanError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PlanError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        let digest = hex::encode(Sha256::digest(&bytes));
        if self.last_digest.as_deref() == Some(digest.as_str()) {
            return Ok(None);
        }
        self.last_digest = Some(digest);
        let text = String::from_utf8_lossy(&bytes);
        Plan::from_json(&text).map(Some)
    }
}

/// Run one pair until `shutdown` fires. Returns the last committed state.
///
/// Recoverable errors are logged and the loop continues; a plan whose tick
/// failed is offered again on the next tick.
pub async fn run_pair<E: ExchangePort>(
    mut executor: PairExecutor<E>,
    mut watcher: PlanWatcher,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Result<ExecutionState, EngineError> {
    let pair = executor.pair().to_string();
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pending: Option<Plan> = None;
    info!(pair = %pair, plan_path = %watcher.path().display(), "Pair loop started");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let mut input_error = None;
        match watcher.poll() {
            Ok(Some(plan)) => pending = Some(plan),
            Ok(None) => {}
            Err(err) => input_error = Some(err.to_string()),
        }
        if let Some(plan) = pending.as_ref().filter(|p| p.pair != pair) {
            warn!(pair = %pair, plan_pair = %plan.pair, "Plan for another pair ignored");
            pending = None;
        }

        let input = TickInput {
            plan: pending.clone(),
            now: Utc::now(),
            input_error,
        };
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!(pair = %pair, "Shutdown during tick; tick not committed");
                break;
            }
            result = executor.tick(input) => match result {
                Ok(report) => {
                    pending = None;
                    debug!(pair = %pair, events = report.events.len(), fills = report.fills.len(), "Tick done");
                }
                Err(err) if err.is_recoverable() => {
                    warn!(pair = %pair, error = %err, "Tick failed; state unchanged");
                }
                Err(err) => {
                    error!(pair = %pair, error = %err, "Pair loop stopped");
                    return Err(err);
                }
            },
        }
    }

    info!(pair = %pair, bar_seq = executor.state().bar_seq, "Pair loop stopped");
    Ok(executor.state().clone())
}

/// Run several pairs concurrently until `shutdown` fires.
///
/// Each pair gets a child token, so one pair failing does not stop the
/// others. Results come back in completion order.
pub async fn run_pairs<E: ExchangePort + 'static>(
    pairs: Vec<(PairExecutor<E>, PlanWatcher)>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Vec<(String, Result<ExecutionState, EngineError>)> {
    let mut set = JoinSet::new();
    for (executor, watcher) in pairs {
        let pair = executor.pair().to_string();
        let token = shutdown.child_token();
        set.spawn(async move { (pair, run_pair(executor, watcher, poll_interval, token).await) });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => error!(error = %err, "Pair task panicked or was aborted"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::PlanAction;
    use crate::domain::plan::fixtures::plan;

    #[test]
    fn test_watcher_yields_only_new_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.json");
        let mut watcher = PlanWatcher::new(&path);
        assert!(watcher.poll().unwrap().is_none());

        let p = plan("p-1", 1, PlanAction::Start);
        std::fs::write(&path, serde_json::to_string(&p).unwrap()).unwrap();
        assert_eq!(watcher.poll().unwrap().unwrap().plan_id, "p-1");
        assert!(watcher.poll().unwrap().is_none());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(watcher.poll().is_err());
        assert!(watcher.poll().unwrap().is_none());
    }
}
