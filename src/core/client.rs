//! Remote telemetry fetch.
//!
//! The client classifies failures and returns; it never retries and never
//! re-authenticates. That policy belongs to [`crate::core::poller::Poller`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url, header};

use crate::core::http::{DEFAULT_TIMEOUT, build_client, classify_send_error};
use crate::core::models::{Credential, Snapshot, VehicleId};
use crate::error::{FleetError, Result};

/// Path of the location-history endpoint, relative to the API base.
pub const LOCATION_PATH: &str = "/api/v1/vehicles/history/location";

/// Anything that can produce the current snapshot of a vehicle.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the snapshot of `vehicle` as of `as_of` (now when `None`).
    ///
    /// # Errors
    /// - [`FleetError::AuthRejected`] when the remote refuses the credential
    /// - [`FleetError::Network`] / [`FleetError::Timeout`] on transport failure
    ///   or any other non-2xx status
    /// - [`FleetError::ParseResponse`] when the body is not a snapshot
    async fn fetch(
        &self,
        vehicle: VehicleId,
        as_of: Option<DateTime<Utc>>,
        credential: &Credential,
    ) -> Result<Snapshot>;
}

/// HTTP implementation of [`SnapshotSource`].
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl TelemetryClient {
    /// Client for `base_url` with the default 30s timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn location_url(&self, vehicle: VehicleId, as_of: DateTime<Utc>) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}{LOCATION_PATH}", self.base_url),
            &[
                ("vehicleId", vehicle.to_string()),
                ("time", as_of.timestamp_millis().to_string()),
            ],
        )
        .map_err(|e| FleetError::Config(format!("invalid API base URL {}: {e}", self.base_url)))
    }
}

#[async_trait]
impl SnapshotSource for TelemetryClient {
    async fn fetch(
        &self,
        vehicle: VehicleId,
        as_of: Option<DateTime<Utc>>,
        credential: &Credential,
    ) -> Result<Snapshot> {
        let url = self.location_url(vehicle, as_of.unwrap_or_else(Utc::now))?;
        tracing::debug!(vehicle_id = vehicle, url = %url, "Fetching vehicle location");

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(credential.access_token())
            .send()
            .await
            .map_err(|e| classify_send_error(&e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FleetError::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FleetError::Network(format!("HTTP {status} for vehicle {vehicle}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_send_error(&e, self.timeout))?;

        decode_snapshot(vehicle, &body)
    }
}

/// Decode a response body into a snapshot attributed to `vehicle`.
///
/// # Errors
/// Returns [`FleetError::ParseResponse`] if the body is not a JSON object of
/// the snapshot shape, or if it names a different vehicle.
pub fn decode_snapshot(vehicle: VehicleId, body: &[u8]) -> Result<Snapshot> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| FleetError::ParseResponse(format!("invalid JSON: {e}")))?;

    if !value.is_object() {
        return Err(FleetError::ParseResponse(format!(
            "expected a JSON object, got {}",
            json_type_name(&value)
        )));
    }

    let mut snapshot: Snapshot = serde_json::from_value(value)
        .map_err(|e| FleetError::ParseResponse(e.to_string()))?;

    match snapshot.vehicle_id {
        None => snapshot.vehicle_id = Some(vehicle),
        Some(id) if id != vehicle => {
            return Err(FleetError::ParseResponse(format!(
                "requested vehicle {vehicle} but response is for vehicle {id}"
            )));
        }
        Some(_) => {}
    }

    Ok(snapshot)
}

const fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_dropped_from_base_url() {
        let client = TelemetryClient::new("http://fleet.test/").unwrap();
        assert_eq!(client.base_url(), "http://fleet.test");

        let as_of = DateTime::<Utc>::from_timestamp_millis(1_772_355_600_000).unwrap();
        let url = client.location_url(5, as_of).unwrap();
        assert_eq!(
            url.as_str(),
            format!("http://fleet.test{LOCATION_PATH}?vehicleId=5&time=1772355600000")
        );
    }

    #[test]
    fn missing_vehicle_id_is_attributed_to_request() {
        let snapshot = decode_snapshot(42, br#"{"speed": 10, "status": "RUNNING"}"#).unwrap();
        assert_eq!(snapshot.vehicle_id, Some(42));
        assert_eq!(snapshot.speed, Some(10.0));
    }

    #[test]
    fn mismatched_vehicle_is_parse_error() {
        let err = decode_snapshot(42, br#"{"vehicleId": 7}"#).unwrap_err();
        assert!(matches!(err, FleetError::ParseResponse(_)));
        assert!(err.to_string().contains("vehicle 7"));
    }

    #[test]
    fn non_object_bodies_are_parse_errors() {
        for body in [&b"[]"[..], b"null", b"\"ok\"", b"<html>", b""] {
            let err = decode_snapshot(1, body).unwrap_err();
            assert!(matches!(err, FleetError::ParseResponse(_)), "{body:?}");
        }
    }

    #[test]
    fn wrong_field_type_is_parse_error() {
        let err = decode_snapshot(1, br#"{"latitude": "north"}"#).unwrap_err();
        assert!(matches!(err, FleetError::ParseResponse(_)));
    }

    #[test]
    fn url_carries_vehicle_and_time() {
        let client = TelemetryClient::new("https://api.example.test/").unwrap();
        let at = DateTime::<Utc>::from_timestamp_millis(1_760_000_000_123).unwrap();
        let url = client.location_url(42, at).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/api/v1/vehicles/history/location?vehicleId=42&time=1760000000123"
        );
    }
}
