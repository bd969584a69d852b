//! fleetwatch - Fleet telemetry poller
//!
//! Periodically pulls the latest location snapshot for a set of vehicles
//! from a remote telemetry API, stores a snapshot only when it differs
//! meaningfully from the last stored one, and keeps the bearer token alive
//! across expiry and server-side rejection.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod storage;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ExitCode, FleetError, Result};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
