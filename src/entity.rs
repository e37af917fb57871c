use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cache::StateCache;
use crate::consumption::ConsumptionMeter;
use crate::gateway::FloGateway;
use crate::types::{Device, Location, MonitoringMode, Snapshot, ValveState};
use crate::Result;

/// Host-facing surface shared by every adapter: a state value, a unit
/// label, auxiliary attributes, a stable unique id, and whether the host
/// must actively poll it (`false` = it refreshes off cache notifications).
pub trait Entity {
    fn unique_id(&self) -> String;
    fn name(&self) -> &str;
    fn unit_of_measurement(&self) -> Option<&str>;
    fn state(&self) -> Option<Value>;
    fn attributes(&self) -> Map<String, Value>;
    fn should_poll(&self) -> bool {
        false
    }
}

fn cached_device(cache: &StateCache, device_id: &str) -> Option<Arc<Snapshot>> {
    cache.get(device_id).filter(|s| s.as_device().is_some())
}

fn cached_location(cache: &StateCache, location_id: &str) -> Option<Arc<Snapshot>> {
    cache.get(location_id).filter(|s| s.as_location().is_some())
}

fn device_attributes(device: &Device) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("device_id".to_string(), json!(device.id));
    if let Some(ref nickname) = device.nickname {
        attrs.insert("nickname".to_string(), json!(nickname));
    }
    if let Some(ref location_id) = device.location_id {
        attrs.insert("location_id".to_string(), json!(location_id));
    }
    attrs
}

macro_rules! telemetry_sensor {
    ($name:ident, $field:ident, $display:expr, $unit:expr, $id_prefix:expr) => {
        pub struct $name {
            cache: Arc<StateCache>,
            device_id: String,
        }

        impl $name {
            pub fn new(cache: Arc<StateCache>, device_id: impl Into<String>) -> Self {
                Self {
                    cache,
                    device_id: device_id.into(),
                }
            }

            pub fn reading(&self) -> Option<f64> {
                let snapshot = cached_device(&self.cache, &self.device_id)?;
                let device = snapshot.as_device()?;
                device.telemetry.as_ref()?.$field
            }
        }

        impl Entity for $name {
            fn unique_id(&self) -> String {
                format!("{}_{}", $id_prefix, self.device_id)
            }

            fn name(&self) -> &str {
                $display
            }

            fn unit_of_measurement(&self) -> Option<&str> {
                Some($unit)
            }

            fn state(&self) -> Option<Value> {
                self.reading().map(|v| json!(v))
            }

            fn attributes(&self) -> Map<String, Value> {
                cached_device(&self.cache, &self.device_id)
                    .and_then(|s| s.as_device().map(device_attributes))
                    .unwrap_or_default()
            }
        }
    };
}

telemetry_sensor!(FlowRateSensor, gpm, "Flo Water Flow Rate", "gpm", "flo_rate");
telemetry_sensor!(TemperatureSensor, temp_f, "Flo Water Temperature", "\u{00b0}F", "flo_temp");

/// Pressure is presentation-rounded to 2 decimal places; the raw telemetry
/// value stays untouched in the cache.
pub struct PressureSensor {
    cache: Arc<StateCache>,
    device_id: String,
}

impl PressureSensor {
    pub fn new(cache: Arc<StateCache>, device_id: impl Into<String>) -> Self {
        Self {
            cache,
            device_id: device_id.into(),
        }
    }

    pub fn reading(&self) -> Option<f64> {
        let snapshot = cached_device(&self.cache, &self.device_id)?;
        let psi = snapshot.as_device()?.telemetry.as_ref()?.psi?;
        Some((psi * 100.0).round() / 100.0)
    }
}

impl Entity for PressureSensor {
    fn unique_id(&self) -> String {
        format!("flo_pressure_{}", self.device_id)
    }

    fn name(&self) -> &str {
        "Flo Water Pressure"
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        Some("psi")
    }

    fn state(&self) -> Option<Value> {
        self.reading().map(|v| json!(v))
    }

    fn attributes(&self) -> Map<String, Value> {
        cached_device(&self.cache, &self.device_id)
            .and_then(|s| s.as_device().map(device_attributes))
            .unwrap_or_default()
    }
}

/// Location-level monitoring mode (home/away/sleep), resolved through the
/// shared target/lastKnown rule. Can also command a mode change, applied
/// optimistically until the next poll confirms it.
pub struct MonitoringModeSensor {
    gateway: Arc<FloGateway>,
    cache: Arc<StateCache>,
    location_id: String,
}

impl MonitoringModeSensor {
    pub fn new(
        gateway: Arc<FloGateway>,
        cache: Arc<StateCache>,
        location_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            cache,
            location_id: location_id.into(),
        }
    }

    pub fn mode(&self) -> Option<MonitoringMode> {
        let snapshot = cached_location(&self.cache, &self.location_id)?;
        snapshot.as_location()?.system_mode.resolved()
    }

    /// Command a monitoring mode change. The new target is written into the
    /// local view immediately; the next poll cycle replaces it with what the
    /// vendor actually reports.
    pub async fn set_mode(&self, mode: MonitoringMode) -> Result<()> {
        self.gateway.set_mode(&self.location_id, mode).await?;
        if let Some(snapshot) = cached_location(&self.cache, &self.location_id)
            && let Some(location) = snapshot.as_location()
        {
            let mut updated: Location = location.clone();
            updated.system_mode.target = Some(mode);
            self.cache
                .insert(self.location_id.clone(), Snapshot::Location(updated));
        }
        debug!(location = %self.location_id, mode = mode.as_api_str(), "monitoring mode set");
        Ok(())
    }
}

impl Entity for MonitoringModeSensor {
    fn unique_id(&self) -> String {
        format!("flo_mode_{}", self.location_id)
    }

    fn name(&self) -> &str {
        "Flo Monitoring Mode"
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> Option<Value> {
        self.mode().map(|m| json!(m.as_api_str()))
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("location_id".to_string(), json!(self.location_id));
        attrs
    }
}

/// The shutoff valve toggle. `is_open()` is `None` when neither target nor
/// lastKnown is reported; callers must surface that as unknown rather than
/// assume a safe-looking default.
pub struct ValveSwitch {
    gateway: Arc<FloGateway>,
    cache: Arc<StateCache>,
    device_id: String,
}

impl ValveSwitch {
    pub fn new(
        gateway: Arc<FloGateway>,
        cache: Arc<StateCache>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            cache,
            device_id: device_id.into(),
        }
    }

    pub fn is_open(&self) -> Option<bool> {
        let snapshot = cached_device(&self.cache, &self.device_id)?;
        snapshot
            .as_device()?
            .valve
            .resolved()
            .map(|state| state == ValveState::Open)
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.command_valve(ValveState::Open).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.command_valve(ValveState::Closed).await
    }

    pub async fn run_health_test(&self) -> Result<()> {
        self.gateway.run_health_test(&self.device_id).await
    }

    /// Valve actuation is not instantaneous, so after the command is
    /// accepted the new target is written into the local view; the next
    /// poll cycle overwrites it with the vendor's own target/lastKnown pair
    /// so a failed actuation is not masked for long.
    async fn command_valve(&self, target: ValveState) -> Result<()> {
        self.gateway.set_valve(&self.device_id, target).await?;
        if let Some(snapshot) = cached_device(&self.cache, &self.device_id)
            && let Some(device) = snapshot.as_device()
        {
            let mut updated: Device = device.clone();
            updated.valve.target = Some(target);
            self.cache
                .insert(self.device_id.clone(), Snapshot::Device(updated));
        }
        debug!(device = %self.device_id, target = target.as_api_str(), "valve command sent");
        Ok(())
    }
}

impl Entity for ValveSwitch {
    fn unique_id(&self) -> String {
        format!("flo_valve_{}", self.device_id)
    }

    fn name(&self) -> &str {
        "Flo Water Valve"
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> Option<Value> {
        self.is_open().map(|open| json!(open))
    }

    fn attributes(&self) -> Map<String, Value> {
        cached_device(&self.cache, &self.device_id)
            .and_then(|s| s.as_device().map(device_attributes))
            .unwrap_or_default()
    }
}

/// Confirmed physical valve position: `lastKnown` only, deliberately
/// ignoring `target`. Diverges from the switch while an actuation is in
/// flight, which is exactly what it exists to show.
pub struct ValvePositionSensor {
    cache: Arc<StateCache>,
    device_id: String,
}

impl ValvePositionSensor {
    pub fn new(cache: Arc<StateCache>, device_id: impl Into<String>) -> Self {
        Self {
            cache,
            device_id: device_id.into(),
        }
    }

    pub fn is_open(&self) -> Option<bool> {
        let snapshot = cached_device(&self.cache, &self.device_id)?;
        snapshot
            .as_device()?
            .valve
            .last_known
            .map(|state| state == ValveState::Open)
    }
}

impl Entity for ValvePositionSensor {
    fn unique_id(&self) -> String {
        format!("flo_valve_position_{}", self.device_id)
    }

    fn name(&self) -> &str {
        "Flo Water Valve Position"
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> Option<Value> {
        self.is_open().map(|open| json!(open))
    }

    fn attributes(&self) -> Map<String, Value> {
        cached_device(&self.cache, &self.device_id)
            .and_then(|s| s.as_device().map(device_attributes))
            .unwrap_or_default()
    }
}

/// Cumulative gallons for the reporting period. Unlike the cache readers,
/// this adapter issues its own interval queries through the meter, so the
/// host must drive `update()` each cycle (`should_poll` is true).
pub struct ConsumptionSensor {
    meter: ConsumptionMeter,
    device_id: String,
}

impl ConsumptionSensor {
    pub fn new(meter: ConsumptionMeter, device_id: impl Into<String>) -> Self {
        Self {
            meter,
            device_id: device_id.into(),
        }
    }

    pub async fn update(&mut self) -> f64 {
        self.meter.update().await
    }

    pub fn meter(&self) -> &ConsumptionMeter {
        &self.meter
    }
}

impl Entity for ConsumptionSensor {
    fn unique_id(&self) -> String {
        format!("flo_consumption_{}", self.device_id)
    }

    fn name(&self) -> &str {
        "Flo Water Consumption"
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        Some("gallons")
    }

    fn state(&self) -> Option<Value> {
        Some(json!(self.meter.state()))
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("device_id".to_string(), json!(self.device_id));
        attrs.insert("mac_address".to_string(), json!(self.meter.mac_address()));
        attrs.insert(
            "period_start".to_string(),
            json!(self.meter.period_start().to_rfc3339()),
        );
        attrs
    }

    fn should_poll(&self) -> bool {
        true
    }
}
