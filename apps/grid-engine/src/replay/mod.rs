//! Deterministic replay of plans over price history, with optional seeded
//! fault injection.

pub mod bars;
pub mod chaos;
pub mod result;
pub mod simulator;

pub use bars::{BarFormat, BarLoadError, load_bars, parse_bars};
pub use chaos::{ChaosCounters, ChaosInjector, ChaosProfile, ChaosProfileError};
pub use result::{ChaosDelta, CurvePoint, RunSummary, SimulationResult, write_result};
pub use simulator::{SimulationConfig, SimulationError, simulate};
