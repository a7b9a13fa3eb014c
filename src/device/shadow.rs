//! Local device state and its reported mirror
//!
//! The store is the only writer of device state. A desired delta is merged and
//! reported while the state lock is held, so reports leave in merge order and a
//! concurrent reader never sees half of a delta applied.

use super::{forward_to, DeviceEvent, EventSender};
use crate::config::ShadowSection;
use crate::error::DeviceResult;
use crate::observability::metrics;
use crate::protocol::{ShadowUpdateAccepted, ShadowUpdateRequest, TopicBuilder};
use crate::transport::{QoS, Transport};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Desired key that switches heartbeats on and off
pub const HEARTBEAT_KEY: &str = "heartbeat";
const TEMPERATURE_KEY: &str = "temperature";

const BATTERY_CHOICES: [i64; 4] = [1, 10, 30, 90];
const FIRMWARE_CHOICES: [&str; 4] = ["0.1", "1.0", "1.5", "2.0"];
const TEMPERATURE_CHOICES: [i64; 3] = [15, 25, 29];
const LOCATION_CHOICES: [&str; 3] = ["nyc", "atl", "bos"];

/// Shared on/off flag for the heartbeat loop
#[derive(Debug, Clone)]
pub struct HeartbeatSwitch(Arc<AtomicBool>);

impl HeartbeatSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        let previous = self.0.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Heartbeat switched");
        }
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Device state as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ShadowState(Map<String, Value>);

impl ShadowState {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Initial state: configured values win, the rest are drawn at random
    pub fn initial(config: &ShadowSection) -> Self {
        let mut rng = rand::rng();
        let mut values = Map::new();

        let battery = config
            .battery
            .or_else(|| BATTERY_CHOICES.choose(&mut rng).copied())
            .unwrap_or(BATTERY_CHOICES[0]);
        let firmware = config
            .firmware
            .clone()
            .or_else(|| FIRMWARE_CHOICES.choose(&mut rng).map(|s| s.to_string()))
            .unwrap_or_default();
        let temperature = config
            .temperature
            .or_else(|| TEMPERATURE_CHOICES.choose(&mut rng).copied())
            .unwrap_or(TEMPERATURE_CHOICES[0]);
        let location = config
            .location
            .clone()
            .or_else(|| LOCATION_CHOICES.choose(&mut rng).map(|s| s.to_string()))
            .unwrap_or_default();

        values.insert("battery".to_string(), Value::from(battery));
        values.insert("firmware".to_string(), Value::from(firmware));
        values.insert("temperature".to_string(), Value::from(temperature));
        values.insert("location".to_string(), Value::from(location));
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Overwrite every key of the delta. Returns the keys written.
    pub fn merge(&mut self, delta: &Map<String, Value>) -> Vec<String> {
        delta
            .iter()
            .map(|(key, value)| {
                self.0.insert(key.clone(), value.clone());
                key.clone()
            })
            .collect()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Loose truthiness for desired flags: false, null, 0, "" and empty containers
/// are off, everything else is on.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Owner of the device state and its reports
pub struct ShadowStore<T: Transport> {
    transport: Arc<T>,
    topics: TopicBuilder,
    state: Mutex<ShadowState>,
    heartbeat: HeartbeatSwitch,
}

impl<T: Transport> ShadowStore<T> {
    pub fn new(
        transport: Arc<T>,
        topics: TopicBuilder,
        initial: ShadowState,
        heartbeat: HeartbeatSwitch,
    ) -> Self {
        Self {
            transport,
            topics,
            state: Mutex::new(initial),
            heartbeat,
        }
    }

    pub fn heartbeat_switch(&self) -> &HeartbeatSwitch {
        &self.heartbeat
    }

    /// Subscribe to accepted state updates. Must run before the first report.
    pub async fn register_listener(&self, events: &EventSender) -> DeviceResult<()> {
        let topic = self.topics.shadow_update_accepted();
        self.transport
            .subscribe(
                &topic,
                QoS::AtLeastOnce,
                forward_to(events, |msg| DeviceEvent::ShadowAccepted(msg.payload)),
            )
            .await
            .map_err(crate::error::DeviceError::transport)?;

        debug!(topic = %topic, "Shadow listener registered");
        Ok(())
    }

    /// Publish `value` as reported state, fire-and-forget at QoS 0
    pub async fn report(&self, value: Value, clear_desired: bool) -> DeviceResult<()> {
        let request = ShadowUpdateRequest::new(value, clear_desired);
        let payload = serde_json::to_vec(&request)?;

        if let Err(e) = self
            .transport
            .publish(&self.topics.shadow_update(), payload, QoS::AtMostOnce)
            .await
        {
            metrics().shadow_report_failed();
            return Err(crate::error::DeviceError::transport(e));
        }

        metrics().shadow_reported();
        debug!(client_token = %request.client_token, clear_desired, "Reported shadow state");
        Ok(())
    }

    /// Report the whole state without touching the desired section
    pub async fn publish_full_state(&self) -> DeviceResult<()> {
        let state = self.state.lock().await;
        info!(state = %state.to_value(), "Publishing full device state");
        self.report(state.to_value(), false).await
    }

    /// Merge a desired delta into local state and report the result
    pub async fn on_desired_update(&self, delta: &Map<String, Value>) -> DeviceResult<()> {
        if delta.is_empty() {
            debug!("Empty desired delta, nothing to merge");
            return Ok(());
        }

        let mut state = self.state.lock().await;
        self.merge_and_report(&mut state, delta).await
    }

    /// Draw a new temperature and merge it like a desired delta
    ///
    /// The pinned check, the merge and the report share one lock hold, so a
    /// concurrent update to the pinned value is never overwritten. Returns
    /// `None` when the stored temperature equals `pinned`. A failed report is
    /// logged; the drifted value stays merged.
    pub async fn drift_temperature(&self, range: RangeInclusive<i64>, pinned: i64) -> Option<i64> {
        let mut state = self.state.lock().await;
        if state.get(TEMPERATURE_KEY).and_then(Value::as_i64) == Some(pinned) {
            debug!(temperature = pinned, "Temperature sensor stuck, not drifting");
            return None;
        }

        let temperature = rand::rng().random_range(range);
        let mut delta = Map::new();
        delta.insert(TEMPERATURE_KEY.to_string(), Value::from(temperature));
        log_report_error(
            self.merge_and_report(&mut state, &delta).await,
            "Temperature drift not reported",
        );
        Some(temperature)
    }

    async fn merge_and_report(
        &self,
        state: &mut ShadowState,
        delta: &Map<String, Value>,
    ) -> DeviceResult<()> {
        if let Some(flag) = delta.get(HEARTBEAT_KEY) {
            self.heartbeat.set(is_truthy(flag));
        }
        let keys = state.merge(delta);
        metrics().desired_merged();
        info!(?keys, "Merged desired state");

        self.report(state.to_value(), true).await
    }

    /// Handle an accepted state-update document
    pub async fn on_update_accepted(&self, payload: &[u8]) -> DeviceResult<()> {
        let accepted: ShadowUpdateAccepted = serde_json::from_slice(payload)?;

        match accepted.desired_delta() {
            Some(delta) => {
                debug!(version = ?accepted.version, "Accepted update carries desired changes");
                self.on_desired_update(delta).await
            }
            None => {
                debug!(version = ?accepted.version, "No changes requested");
                Ok(())
            }
        }
    }

    /// Overwrite one key and report only that key
    pub async fn set_and_report(&self, key: &str, value: Value) -> DeviceResult<()> {
        let mut state = self.state.lock().await;
        state.insert(key, value.clone());

        let mut partial = Map::new();
        partial.insert(key.to_string(), value);
        self.report(Value::Object(partial), false).await
    }

    pub async fn snapshot(&self) -> ShadowState {
        self.state.lock().await.clone()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().await.get(key).cloned()
    }
}

/// Log and swallow a report failure where reporting is best effort
fn log_report_error(result: DeviceResult<()>, context: &str) {
    if let Err(e) = result {
        warn!(error = %e, "{}", context);
    }
}
