//! # lib_tempest
//!
//! Live Tempest weather telemetry: a websocket read task, a connection
//! lifecycle with a bounded reconnect budget, and a single-writer state
//! aggregator publishing dashboard snapshots.
//!
//! Modules are gated by cargo features (`ingestors`, `core`, `retrieve`);
//! `full` enables everything.

#[cfg(feature = "ingestors")]
pub mod models;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "ingestors")]
pub use models::*;
