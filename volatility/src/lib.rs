//! Streaming volatility estimation for a single trading pair.
//!
//! Everything in this crate is synchronous and deterministic. A
//! [`pipeline::PairPipeline`] chains the stages for one pair:
//!
//! ```text
//! raw tick ─▶ normalizer ─▶ estimator ─▶ forecaster ─▶ synthesizer ─▶ VolatilityRecord
//! ```
//!
//! Concurrency, persistence and logging setup live in the `engine` and
//! `history` crates.

pub mod config;
pub mod estimator;
pub mod forecaster;
pub mod normalizer;
pub mod pipeline;
pub mod rolling_window;
pub mod synthesizer;
pub mod types;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use config::{ModelConfig, ModelConfigError};
pub use normalizer::InvalidTick;
pub use types::{Tick, VarianceState, VolRegime, VolatilityRecord};
