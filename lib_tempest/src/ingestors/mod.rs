//! # Data Ingestors Module
//!
//! Everything that touches the Tempest websocket lives here. The decoder is
//! pure; the read task owns the socket and speaks to the rest of the crate only
//! through the `LiveMessage` channel.
//!
//! ## Contained Modules:
//! - **`frames`**: envelope-first frame decoding and the outbound subscription
//!   requests.
//! - **`tempest_wss`**: the read task, the `Dialer` seam and the production
//!   `WssDialer`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Pure decoding of raw payloads into typed frames.
pub mod frames;
/// The websocket read task.
pub mod tempest_wss;

// --- Public API Re-exports ---
pub use frames::{decode_frame, DecodeError, Frame, ListenRequest};
pub use tempest_wss::{run_session, Dialer, LiveError, SessionContext, WssDialer};
