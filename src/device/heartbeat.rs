//! Periodic liveness beacon and synthetic temperature drift

use super::shadow::{HeartbeatSwitch, ShadowStore};
use crate::config::{HeartbeatSection, SimulationSection};
use crate::observability::metrics;
use crate::protocol::TopicBuilder;
use crate::transport::{QoS, Transport};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const HEARTBEAT_PAYLOAD: &[u8] = b"alive";

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Disabled,
    /// `temperature` is `None` when the sensor is stuck at the failure value
    Sent { temperature: Option<i64> },
}

pub struct HeartbeatLoop<T: Transport> {
    transport: Arc<T>,
    topic: String,
    shadow: Arc<ShadowStore<T>>,
    switch: HeartbeatSwitch,
    interval: Duration,
    temperature_range: RangeInclusive<i64>,
    failed_sensor_temperature: i64,
}

impl<T: Transport + 'static> HeartbeatLoop<T> {
    pub fn new(
        transport: Arc<T>,
        topics: &TopicBuilder,
        shadow: Arc<ShadowStore<T>>,
        config: &HeartbeatSection,
        simulation: &SimulationSection,
    ) -> Self {
        Self {
            transport,
            topic: topics.heartbeat(),
            switch: shadow.heartbeat_switch().clone(),
            shadow,
            interval: Duration::from_secs(config.interval_secs),
            temperature_range: config.temperature_range(),
            failed_sensor_temperature: simulation.sensor_failed_temperature,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// One beat: publish liveness, then drift the temperature
    pub async fn tick(&self) -> TickOutcome {
        if !self.switch.is_enabled() {
            return TickOutcome::Disabled;
        }

        match self
            .transport
            .publish(&self.topic, HEARTBEAT_PAYLOAD.to_vec(), QoS::AtLeastOnce)
            .await
        {
            Ok(()) => {
                metrics().heartbeat_sent();
                debug!(topic = %self.topic, "Heartbeat sent");
            }
            Err(e) => {
                metrics().heartbeat_failed();
                warn!(error = %e, "Heartbeat publish failed");
            }
        }

        let temperature = self
            .shadow
            .drift_temperature(self.temperature_range.clone(), self.failed_sensor_temperature)
            .await;
        TickOutcome::Sent { temperature }
    }

    /// Tick forever on the configured interval. The session aborts the task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick of an interval completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ShadowState;
    use crate::testing::mocks::MockTransport;
    use serde_json::{json, Map, Value};

    fn heartbeat(state: Value) -> (HeartbeatLoop<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::connected());
        let topics = TopicBuilder::aws("hb-device");
        let values = match state {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let shadow = Arc::new(ShadowStore::new(
            transport.clone(),
            topics.clone(),
            ShadowState::new(values),
            HeartbeatSwitch::new(true),
        ));
        let hb = HeartbeatLoop::new(
            transport.clone(),
            &topics,
            shadow,
            &HeartbeatSection::default(),
            &SimulationSection::default(),
        );
        (hb, transport)
    }

    #[tokio::test]
    async fn test_tick_publishes_and_drifts() {
        let (hb, transport) = heartbeat(json!({"temperature": 15}));

        let outcome = hb.tick().await;

        let TickOutcome::Sent { temperature: Some(t) } = outcome else {
            panic!("expected a drifted temperature, got {outcome:?}");
        };
        assert!((10..=16).contains(&t));

        let beats = transport.published_on("demofleet/hb-device/heartbeat");
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].payload, b"alive");
        assert_eq!(beats[0].qos, QoS::AtLeastOnce);

        let reports = transport.published_json("$aws/things/hb-device/shadow/update");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["state"]["reported"]["temperature"], t);
    }

    #[tokio::test]
    async fn test_disabled_tick_does_nothing() {
        let (hb, transport) = heartbeat(json!({"temperature": 15}));
        hb.switch.disable();

        assert_eq!(hb.tick().await, TickOutcome::Disabled);
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sensor_stops_drift() {
        let (hb, transport) = heartbeat(json!({"temperature": 100}));

        assert_eq!(hb.tick().await, TickOutcome::Sent { temperature: None });
        assert_eq!(transport.published().len(), 1);
        assert_eq!(hb.shadow.get("temperature").await, Some(json!(100)));
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let (hb, transport) = heartbeat(json!({"temperature": 15}));
        transport.fail_publishes(true);

        let outcome = hb.tick().await;

        assert!(matches!(outcome, TickOutcome::Sent { temperature: Some(_) }));
        assert!(transport.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_ticks_on_interval() {
        let (hb, transport) = heartbeat(json!({"temperature": 15}));
        let handle = Arc::new(hb).spawn();

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(transport.published_on("demofleet/hb-device/heartbeat").len(), 1);

        handle.abort();
    }
}
