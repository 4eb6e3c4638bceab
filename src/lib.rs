//! Cross-chain dust consolidation backend.
//!
//! Aggregates bridge quotes from heterogeneous providers, turns per-chain
//! dust holdings into a costed multi-chain consolidation plan, dispatches the
//! plan to an external worker and tracks its execution.

pub mod bridges;
pub mod cache;
pub mod consolidation;
pub mod types;
