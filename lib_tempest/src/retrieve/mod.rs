//! # Data Retrieval Module
//!
//! HTTP-based lookups that run before the live pipeline starts.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//! - **`station`**: resolves a station id into the device id and display
//!   metadata the live session needs.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
/// Station metadata lookup.
pub mod station;

pub use ky_http::{ApiClient, ApiResponse, DEFAULT_API_URL};
pub use station::fetch_station_meta;
