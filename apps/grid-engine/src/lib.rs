// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Grid Engine - Plan Execution & Replay Core
//!
//! Applies signed, versioned grid plans from an external planner, either
//! against an exchange (live) or against historical bars (replay). Both
//! modes go through the same decision core, so a plan means the same thing
//! in either.
//!
//! ## Layout
//!
//! - **Domain** ([`domain`]): plan contract, integrity verifier, action
//!   suppression, ladder builder, fill detection and the shared core
//! - **State** ([`state`]): per-pair execution state and atomic snapshots
//! - **Exchange** ([`exchange`]): venue capability trait, retry policy and
//!   an in-process paper venue
//! - **Live** ([`live`]): reconciliation, safety rules, the per-pair
//!   executor and the control loops
//! - **Replay** ([`replay`]): bar loading, seeded chaos injection and the
//!   simulator
//! - **Plans** ([`plans`]): plan directory access and scheduling
//!
//! Configuration lives in [`config`]; errors are aggregated in [`error`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod live;
pub mod observability;
pub mod plans;
pub mod replay;
pub mod state;

// =============================================================================
// Re-exports
// =============================================================================

pub use domain::core::{CoreParams, Execution, PlanOutcome};
pub use domain::events::{EngineEvent, EventKind, EventLog};
pub use domain::fills::Bar;
pub use domain::order::{Fill, FillReason, OrderStatus, RestingOrder, Side};
pub use domain::plan::{Plan, PlanAction, PlanError};
pub use error::{EngineError, ErrorClass};
pub use exchange::{ExchangePort, PaperExchange};
pub use live::{PairExecutor, PlanWatcher, run_pair, run_pairs};
pub use plans::{PlanSchedule, PlanStore};
pub use replay::{ChaosProfile, SimulationConfig, SimulationResult, simulate};
pub use state::{ExecutionState, StateStore};
