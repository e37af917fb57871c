use chrono::{DateTime, Utc};
use serde_json::Value;

/// Location-level monitoring mode (affects Flo's alerting behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringMode {
    Home,
    Away,
    Sleep,
}

impl MonitoringMode {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            MonitoringMode::Home => "home",
            MonitoringMode::Away => "away",
            MonitoringMode::Sleep => "sleep",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "home" => Some(MonitoringMode::Home),
            "away" => Some(MonitoringMode::Away),
            "sleep" => Some(MonitoringMode::Sleep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    Open,
    Closed,
}

impl ValveState {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ValveState::Open => "open",
            ValveState::Closed => "closed",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ValveState::Open),
            "closed" => Some(ValveState::Closed),
            _ => None,
        }
    }
}

/// Flo's two-field representation of device state: `target` is what a
/// command asked for, `lastKnown` is what firmware last confirmed. Depending
/// on how recently a command was issued the service populates either, both,
/// or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingState<T> {
    pub target: Option<T>,
    pub last_known: Option<T>,
}

impl<T> Default for PendingState<T> {
    fn default() -> Self {
        Self {
            target: None,
            last_known: None,
        }
    }
}

impl<T: Copy> PendingState<T> {
    /// Resolution rule, shared by valve and monitoring-mode consumers:
    /// `target` wins, otherwise `lastKnown`, otherwise unknown. `None` is
    /// never replaced with a guessed default; a misreported valve must
    /// surface as unknown, not as open.
    pub fn resolved(&self) -> Option<T> {
        self.target.or(self.last_known)
    }
}

impl<T> PendingState<T> {
    pub fn from_json(record: Option<&Value>, parse: fn(&str) -> Option<T>) -> Self {
        let Some(record) = record else {
            return Self { target: None, last_known: None };
        };
        Self {
            target: record.get("target").and_then(|v| v.as_str()).and_then(parse),
            last_known: record
                .get("lastKnown")
                .and_then(|v| v.as_str())
                .and_then(parse),
        }
    }
}

/// Instantaneous sensor readings. Every field is optional: devices that have
/// been offline report partial or empty telemetry blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub gpm: Option<f64>,
    pub psi: Option<f64>,
    pub temp_f: Option<f64>,
    pub updated: Option<DateTime<Utc>>,
}

impl Telemetry {
    fn from_json(current: &Value) -> Self {
        Self {
            gpm: current.get("gpm").and_then(|v| v.as_f64()),
            psi: current.get("psi").and_then(|v| v.as_f64()),
            temp_f: current.get("tempF").and_then(|v| v.as_f64()),
            updated: current
                .get("updated")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok()),
        }
    }
}

/// One water-monitoring/shutoff unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub mac_address: Option<String>,
    pub location_id: Option<String>,
    pub nickname: Option<String>,
    pub telemetry: Option<Telemetry>,
    pub valve: PendingState<ValveState>,
    /// Full vendor record, kept so adapters can expose auxiliary attributes.
    pub raw: Value,
}

impl Device {
    pub fn from_json(data: &Value) -> Option<Self> {
        let id = data.get("id").and_then(|v| v.as_str())?.to_string();
        Some(Self {
            id,
            mac_address: data
                .get("macAddress")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            location_id: data
                .pointer("/location/id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            nickname: data
                .get("nickname")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            telemetry: data.pointer("/telemetry/current").map(Telemetry::from_json),
            valve: PendingState::from_json(data.get("valve"), ValveState::from_api_str),
            raw: data.clone(),
        })
    }
}

/// A physical site containing one or more devices.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: String,
    pub nickname: Option<String>,
    pub device_ids: Vec<String>,
    pub system_mode: PendingState<MonitoringMode>,
    pub raw: Value,
}

impl Location {
    pub fn from_json(data: &Value) -> Option<Self> {
        let id = data.get("id").and_then(|v| v.as_str())?.to_string();
        let device_ids = match data.get("devices") {
            Some(Value::Array(devices)) => devices
                .iter()
                .filter_map(|d| d.get("id").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Some(Self {
            id,
            nickname: data
                .get("nickname")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            device_ids,
            system_mode: PendingState::from_json(
                data.get("systemMode"),
                MonitoringMode::from_api_str,
            ),
            raw: data.clone(),
        })
    }
}

/// Result of a consumption aggregation query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumptionReport {
    pub total_gallons: f64,
}

/// Granularity token for consumption queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Minute,
    Hour,
}

impl Interval {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Interval::Minute => "1m",
            Interval::Hour => "1h",
        }
    }
}

/// The unit stored in the shared state cache, keyed by entity id.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Location(Location),
    Device(Device),
}

impl Snapshot {
    pub fn as_location(&self) -> Option<&Location> {
        match self {
            Snapshot::Location(loc) => Some(loc),
            Snapshot::Device(_) => None,
        }
    }

    pub fn as_device(&self) -> Option<&Device> {
        match self {
            Snapshot::Device(dev) => Some(dev),
            Snapshot::Location(_) => None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Snapshot::Location(loc) => &loc.id,
            Snapshot::Device(dev) => &dev.id,
        }
    }
}
