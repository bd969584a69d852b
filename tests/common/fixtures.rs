//! Remote payload fixtures and mock-server wiring.
#![allow(dead_code)]

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetwatch::core::client::LOCATION_PATH;
use fleetwatch::core::models::VehicleId;

/// A realistic location payload in the remote's shape.
pub fn location_payload(vehicle: VehicleId, latitude: f64, longitude: f64, speed: f64) -> Value {
    json!({
        "vehicleId": vehicle,
        "deviceId": "359632101234567",
        "accountId": 9001,
        "vehicleNumber": format!("DL01AB{vehicle:04}"),
        "groupId": 12,
        "vehicleName": format!("Truck {vehicle}"),
        "vehicleMake": "Tata",
        "vehicleModel": "Ultra T.16",
        "vehicleYear": 2022,
        "driverName": "R. Kumar",
        "driverId": 501,
        "fuelType": "DIESEL",
        "type": "TRUCK",
        "latitude": latitude,
        "longitude": longitude,
        "speed": speed,
        "course": 270.0,
        "address": "NH48, Gurugram, Haryana",
        "gear": 4,
        "rpm": 1450,
        "rpmSlot": 3,
        "currentFuelConsumption": 1.2,
        "totalFuelConsumption": 5321.7,
        "currentOdometer": 12.5,
        "totalOdometer": 88231.4,
        "durationEngineOn": 3600,
        "status": if speed > 0.0 { "RUNNING" } else { "IDLE" },
        "lastAccOn": "2026-03-01T09:00:00Z",
        "timeStamp": 1_772_355_600_000_i64,
        "serverTime": 1_772_355_601_000_i64,
        "otherAttributes": { "ignition": true, "batteryVoltage": 12.7 }
    })
}

/// Mount a 200 response for one vehicle.
pub async fn mount_location(server: &MockServer, vehicle: VehicleId, body: Value) {
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .and(query_param("vehicleId", vehicle.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount a bare status response for one vehicle.
pub async fn mount_status(server: &MockServer, vehicle: VehicleId, status: u16) {
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .and(query_param("vehicleId", vehicle.to_string()))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
