use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::types::{ConsumptionReport, Interval, Location, MonitoringMode, ValveState};

pub const DEFAULT_BASE_URL: &str = "https://api.meetflo.com";

/// Flo's consumption API expects millisecond-less UTC timestamps.
const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S.000Z";

/// Sleep mode reverts to home after 8 hours unless told otherwise.
const SLEEP_REVERT_MINUTES: u32 = 480;

pub fn auth_path() -> &'static str {
    "/api/v1/users/auth"
}

pub fn user_path(user_id: &str) -> String {
    format!("/api/v2/users/{user_id}?expand=locations")
}

pub fn location_path(location_id: &str) -> String {
    format!("/api/v2/locations/{location_id}?expand=devices")
}

pub fn device_path(device_id: &str) -> String {
    format!("/api/v2/devices/{device_id}")
}

pub fn set_mode_path(location_id: &str) -> String {
    format!("/api/v2/locations/{location_id}/systemMode")
}

pub fn health_test_path(device_id: &str) -> String {
    format!("/api/v2/devices/{device_id}/healthTest/run")
}

pub fn consumption_path() -> &'static str {
    "/api/v2/water/consumption"
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIME_FMT).to_string()
}

pub fn auth_message(username: &str, password: &str) -> Value {
    json!({
        "username": username,
        "password": password,
    })
}

pub fn set_valve_data(target: ValveState) -> Value {
    json!({
        "valve": { "target": target.as_api_str() }
    })
}

pub fn set_mode_data(mode: MonitoringMode) -> Value {
    match mode {
        MonitoringMode::Sleep => json!({
            "target": mode.as_api_str(),
            "revertMinutes": SLEEP_REVERT_MINUTES,
            "revertMode": MonitoringMode::Home.as_api_str(),
        }),
        _ => json!({ "target": mode.as_api_str() }),
    }
}

pub fn consumption_query(
    location_id: &str,
    mac_address: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    interval: Interval,
) -> Vec<(&'static str, String)> {
    vec![
        ("startDate", format_timestamp(start)),
        ("endDate", format_timestamp(end)),
        ("locationId", location_id.to_string()),
        ("macAddress", mac_address.to_string()),
        ("interval", interval.as_api_str().to_string()),
    ]
}

/// Pull `(token, user_id)` out of an auth response.
pub fn parse_auth_response(body: &Value) -> Option<(String, String)> {
    let token = body.get("token").and_then(|v| v.as_str())?;
    let user_id = body
        .pointer("/tokenPayload/user/user_id")
        .and_then(|v| v.as_str())?;
    Some((token.to_string(), user_id.to_string()))
}

/// Locations come back nested under the expanded user record.
pub fn parse_user_locations(body: &Value) -> Vec<Location> {
    match body.get("locations") {
        Some(Value::Array(locations)) => {
            locations.iter().filter_map(Location::from_json).collect()
        }
        _ => Vec::new(),
    }
}

/// The aggregation block is the only part of a consumption response the
/// crate consumes. Absent or non-numeric totals yield `None` so callers can
/// apply their zero-contribution policy.
pub fn parse_consumption_response(body: &Value) -> Option<ConsumptionReport> {
    let total = body
        .pointer("/aggregations/sumTotalGallonsConsumed")
        .and_then(|v| v.as_f64())?;
    Some(ConsumptionReport { total_gallons: total })
}
