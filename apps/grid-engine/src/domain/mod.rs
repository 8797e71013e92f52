//! Domain Layer
//!
//! Pure decision logic shared by live execution and replay. Nothing in here
//! performs I/O or reads a clock.
//!
//! - [`plan`]: the plan contract and its structural validation
//! - [`integrity`]: duplicate, stale-sequence and hash checks
//! - [`signature`]: ladder fingerprints and transition classification
//! - [`suppression`]: raw verdict to effective action
//! - [`ladder`]: rung layout, sizing and soft adjust
//! - [`fills`]: bar-driven fill detection, cooldowns and exits
//! - [`order`]: resting orders and fills
//! - [`events`]: reason-coded engine events
//! - [`core`]: the operations both modes call

pub mod core;
pub mod events;
pub mod fills;
pub mod integrity;
pub mod ladder;
pub mod order;
pub mod plan;
pub mod signature;
pub mod suppression;
