use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    auth_message, auth_path, consumption_path, consumption_query, device_path, health_test_path,
    location_path, parse_auth_response, parse_consumption_response, parse_user_locations,
    set_mode_data, set_mode_path, set_valve_data, user_path, DEFAULT_BASE_URL,
};
use crate::types::{ConsumptionReport, Device, Interval, Location, MonitoringMode, ValveState};
use crate::{Error, Result};

/// How long read responses are served from the internal cache. Short enough
/// to stay roughly current for ad-hoc reads, long enough that a burst of
/// adapter reads between poll cycles costs one HTTP call.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(270);

struct Session {
    token: String,
    user_id: String,
}

pub struct FloGatewayBuilder {
    username: String,
    password: String,
    base_url: String,
    cache_ttl: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl FloGatewayBuilder {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            log_mode: None,
            log_path: None,
        }
    }

    /// Override the API endpoint (tests point this at a local mock).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> FloGateway {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client");

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(
                MessageLogger::new(mode, &path).expect("failed to open log file"),
            )),
            _ => None,
        };

        FloGateway {
            http,
            base_url: self.base_url,
            username: self.username,
            password: self.password,
            cache_ttl: self.cache_ttl,
            session: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
            logger,
        }
    }
}

/// Thin wrapper over the Flo cloud API. Shared behind an `Arc` by the poll
/// coordinator, consumption meters, and command adapters, so every method
/// takes `&self`; the session token and response cache use interior locks.
pub struct FloGateway {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    cache_ttl: Duration,
    session: Mutex<Option<Session>>,
    cache: Mutex<HashMap<String, (Instant, Value)>>,
    logger: Option<Mutex<MessageLogger>>,
}

impl FloGateway {
    pub fn builder(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> FloGatewayBuilder {
        FloGatewayBuilder::new(username, password)
    }

    /// Authenticate and store the session token. Session renewal is the
    /// caller's concern: an expired token surfaces as an HTTP error on the
    /// next call, and the host may simply `connect()` again.
    pub async fn connect(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, auth_path());
        debug!(url = %url, "authenticating with Flo service");
        self.log_request("POST", auth_path());

        let resp = self
            .http
            .post(&url)
            .json(&auth_message(&self.username, &self.password))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = resp.json().await?;
        let (token, user_id) = parse_auth_response(&body)
            .ok_or_else(|| Error::Protocol("auth response missing token or user id".into()))?;

        debug!(user_id = %user_id, "Flo session established");
        *self.session.lock().expect("session lock poisoned") = Some(Session { token, user_id });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().expect("session lock poisoned").is_some()
    }

    /// Drop every cached read response so the next reads hit the service.
    /// The poll coordinator calls this at the start of each cycle.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("cache lock poisoned").clear();
    }

    /// All locations (with nested device stubs) for the authenticated user.
    pub async fn locations(&self) -> Result<Vec<Location>> {
        let (token, user_id) = self.credentials()?;
        let path = user_path(&user_id);
        let body = self
            .cached_get(&path, &token)
            .await?
            .ok_or_else(|| Error::Protocol(format!("user record missing for {user_id}")))?;
        Ok(parse_user_locations(&body))
    }

    /// One location with its device list expanded, or `None` if unknown.
    pub async fn location(&self, location_id: &str) -> Result<Option<Location>> {
        let (token, _) = self.credentials()?;
        let path = location_path(location_id);
        match self.cached_get(&path, &token).await? {
            Some(body) => Ok(Location::from_json(&body)),
            None => Ok(None),
        }
    }

    /// One device record, or `None` if unknown.
    pub async fn device(&self, device_id: &str) -> Result<Option<Device>> {
        let (token, _) = self.credentials()?;
        let path = device_path(device_id);
        match self.cached_get(&path, &token).await? {
            Some(body) => Ok(Device::from_json(&body)),
            None => Ok(None),
        }
    }

    /// Consumption aggregation for a time range. Never cached (time-ranged
    /// queries are unique). `None` means the response had no usable total.
    pub async fn consumption(
        &self,
        location_id: &str,
        mac_address: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        interval: Interval,
    ) -> Result<Option<ConsumptionReport>> {
        let (token, _) = self.credentials()?;
        let url = format!("{}{}", self.base_url, consumption_path());
        let params = consumption_query(location_id, mac_address, start, end, interval);
        self.log_request("GET", consumption_path());
        trace!(
            start = %start, end = %end, interval = interval.as_api_str(),
            "querying consumption"
        );

        let resp = self
            .http
            .get(&url)
            .query(&params)
            .header("authorization", &token)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = resp.json().await?;
        Ok(parse_consumption_response(&body))
    }

    pub async fn set_valve(&self, device_id: &str, target: ValveState) -> Result<()> {
        let data = set_valve_data(target);
        self.post_command(
            "set_valve",
            device_id,
            &device_path(device_id),
            data,
            Error::InvalidDevice,
        )
        .await
    }

    pub async fn set_mode(&self, location_id: &str, mode: MonitoringMode) -> Result<()> {
        let data = set_mode_data(mode);
        self.post_command(
            "set_mode",
            location_id,
            &set_mode_path(location_id),
            data,
            Error::InvalidLocation,
        )
        .await
    }

    pub async fn run_health_test(&self, device_id: &str) -> Result<()> {
        self.post_command(
            "run_health_test",
            device_id,
            &health_test_path(device_id),
            Value::Object(serde_json::Map::new()),
            Error::InvalidDevice,
        )
        .await
    }

    // -- Helpers --

    fn credentials(&self) -> Result<(String, String)> {
        let session = self.session.lock().expect("session lock poisoned");
        match session.as_ref() {
            Some(s) => Ok((s.token.clone(), s.user_id.clone())),
            None => Err(Error::NotConnected),
        }
    }

    async fn cached_get(&self, path: &str, token: &str) -> Result<Option<Value>> {
        {
            let cache = self.cache.lock().expect("cache lock poisoned");
            if let Some((stored_at, value)) = cache.get(path)
                && stored_at.elapsed() < self.cache_ttl
            {
                trace!(path = %path, "serving from gateway cache");
                return Ok(Some(value.clone()));
            }
        }

        let url = format!("{}{}", self.base_url, path);
        self.log_request("GET", path);
        let resp = self
            .http
            .get(&url)
            .header("authorization", token)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            debug!(path = %path, "resource not found");
            return Ok(None);
        }

        let body: Value = resp.error_for_status()?.json().await?;
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .insert(path.to_string(), (Instant::now(), body.clone()));
        Ok(Some(body))
    }

    /// Commands target a specific location or device, so a 404 means the id
    /// itself is wrong and is reported as such rather than as a plain HTTP
    /// error (reads treat 404 as `None` instead).
    async fn post_command(
        &self,
        action: &str,
        target_id: &str,
        path: &str,
        data: Value,
        missing: fn(String) -> Error,
    ) -> Result<()> {
        let (token, _) = self.credentials()?;
        if let Some(ref logger) = self.logger {
            logger
                .lock()
                .expect("logger lock poisoned")
                .log_command(action, target_id, &data);
        }

        let url = format!("{}{}", self.base_url, path);
        debug!(action = %action, target = %target_id, "sending command");
        let resp = self
            .http
            .post(&url)
            .header("authorization", &token)
            .json(&data)
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Err(missing(target_id.to_string()));
        }
        resp.error_for_status()?;
        Ok(())
    }

    fn log_request(&self, method: &str, path: &str) {
        if let Some(ref logger) = self.logger {
            logger
                .lock()
                .expect("logger lock poisoned")
                .log_request(method, path);
        }
    }

    pub(crate) fn log_cycle(&self, cycle_id: &str, locations: usize, devices: usize, failures: usize) {
        if let Some(ref logger) = self.logger {
            logger
                .lock()
                .expect("logger lock poisoned")
                .log_cycle(cycle_id, locations, devices, failures);
        }
    }
}
