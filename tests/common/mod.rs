//! Common test utilities and fixtures for integration tests.
//!
//! # Modules
//!
//! - `fixtures`: remote payloads and mock-server wiring
//! - `log_capture`: tracing capture for asserting structured log fields
//! - `logger`: phase-tagged test progress output

pub mod fixtures;
pub mod log_capture;
pub mod logger;
