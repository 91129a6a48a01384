//! Multi-pair volatility engine.
//!
//! Ticks are routed to one worker task per pair. Each worker owns that pair's
//! [`volatility::pipeline::PairPipeline`] and persists every emitted record
//! through a [`history::VolatilityStore`] before acknowledging it. Reads go
//! through [`query::QueryService`] straight to the store.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod query;
pub mod router;
pub mod worker;

pub use config::{EngineConfig, StoreBackend};
pub use engine::VolatilityEngine;
pub use error::{EngineError, QueryError};
pub use metrics::Counters;
pub use query::{QueryService, TermPoint};
