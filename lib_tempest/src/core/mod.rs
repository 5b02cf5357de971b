//! # Core Engine Module
//!
//! The synchronous heart of the live pipeline and the task that drives it.
//!
//! ## Core Components:
//!
//! - **`lifecycle`**: the connection state machine. Pure and synchronous; it
//!   decides when to dial, when to retry and when to give up.
//!
//! - **`snapshot`**: the presentation-ready aggregate plus its bounded wind
//!   history and event log.
//!
//! - **`aggregator`**: the single-writer reducer folding every `LiveMessage`
//!   into the snapshot.
//!
//! - **`event_loop`**: the one task that owns both of the above, spawns and
//!   reaps sessions, arms reconnect timers and publishes snapshots.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Single-writer reducer for dashboard state.
pub mod aggregator;
/// The task that drives sessions, timers and publication.
pub mod event_loop;
/// The connection state machine and its reconnect budget.
pub mod lifecycle;
/// Dashboard snapshot and its bounded buffers.
pub mod snapshot;

// --- Public API Re-exports ---
pub use aggregator::StateAggregator;
pub use event_loop::{spawn_live, LiveHandle, LiveSettings};
pub use lifecycle::{ConnectionLifecycle, ConnectionPhase, ConnectionState};
pub use snapshot::{DashboardSnapshot, EventLog, WindHistory};
