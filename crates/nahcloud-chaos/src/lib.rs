//! Seeded latency and error injection for the mock API.
//!
//! A [`ChaosEngine`] is built once from an immutable [`ChaosConfig`] and
//! consulted by the HTTP layer before each request in a chaos-enabled
//! [`ResourceCategory`] reaches its handler.

pub mod config;
pub mod engine;
pub mod overrides;

pub use config::{ChaosConfig, ChaosConfigError, LatencyRange, ResourceCategory};
pub use engine::ChaosEngine;
pub use overrides::{ChaosOverrides, LATENCY_HEADER, NO_CHAOS_HEADER};
