//! Consumer-side orchestrator for dataspace contract negotiation and data
//! transfer (spec §1). See `main.rs` for the binary entry point and
//! `DESIGN.md` for the grounding ledger.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod protocol_client;
pub mod registry;
pub mod supervisor;
pub mod telemetry;
pub mod vault;

pub use engine::Engine;
