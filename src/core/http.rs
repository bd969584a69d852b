//! HTTP client construction.
//!
//! One client is built per process and shared by every fetch.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::error::{FleetError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("fleetwatch/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FleetError::Network(e.to_string()))
}

/// Get or create a default HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn default_client() -> Result<Client> {
    build_client(DEFAULT_TIMEOUT)
}

/// Classify a transport-level reqwest failure.
pub(crate) fn classify_send_error(err: &reqwest::Error, timeout: Duration) -> FleetError {
    if err.is_timeout() {
        FleetError::Timeout(timeout.as_secs())
    } else {
        FleetError::Network(err.to_string())
    }
}
