//! Live execution against an [`ExchangePort`](crate::exchange::ExchangePort).

pub mod executor;
pub mod reconcile;
pub mod runner;
pub mod safety;

pub use executor::{ExecutorSettings, PairExecutor, PlacementPolicy, TickInput, TickReport};
pub use reconcile::{ReconcileParams, ReconcilePlan, plan_actions};
pub use runner::{PlanWatcher, run_pair, run_pairs};
pub use safety::{RejectBurstDetector, SafetyParams};
