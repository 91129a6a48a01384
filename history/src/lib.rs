//! Durable, per-pair history of volatility records.
//!
//! Two backends implement [`store::VolatilityStore`]: an append-only JSON
//! Lines log per pair ([`store::jsonl_store`]) and a single SQLite table
//! ([`store::sqlite_store`]).

pub mod store;

pub use store::{AppendOutcome, StoreError, VolatilityStore};
