//! ORDER_66: simulated field failures
//!
//! The first matching condition wins:
//!
//! 1. battery below the threshold: heartbeats stop, graceful shutdown
//! 2. oldest firmware: crash
//! 3. sensor-failure location: temperature pinned to the failed-sensor value
//! 4. buggy firmware: heartbeats stop
//!
//! A device matching none of them is unaffected.

use crate::config::SimulationSection;
use crate::device::ShadowState;
use crate::error::OperationError;
use crate::operations::{Operation, OperationContext, OperationOutcome, ShutdownKind};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

pub struct Order66;

/// Failure selected for the current device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    LowBattery,
    Crash,
    SensorFailure,
    TelemetryBug,
}

/// Pick the failure for a device state
pub fn select_fault(state: &ShadowState, simulation: &SimulationSection) -> Option<FaultKind> {
    let battery = state.get("battery").and_then(Value::as_f64);
    let firmware = state.get("firmware").and_then(Value::as_str);
    let location = state.get("location").and_then(Value::as_str);

    if battery.is_some_and(|b| b < simulation.low_battery_threshold) {
        Some(FaultKind::LowBattery)
    } else if firmware == Some(simulation.oldest_firmware.as_str()) {
        Some(FaultKind::Crash)
    } else if location == Some(simulation.sensor_failure_location.as_str()) {
        Some(FaultKind::SensorFailure)
    } else if firmware == Some(simulation.buggy_firmware.as_str()) {
        Some(FaultKind::TelemetryBug)
    } else {
        None
    }
}

#[async_trait]
impl<T: Transport> Operation<T> for Order66 {
    fn name(&self) -> &str {
        "ORDER_66"
    }

    async fn execute(
        &self,
        _document: &Value,
        ctx: &OperationContext<T>,
    ) -> Result<OperationOutcome, OperationError> {
        let state = ctx.shadow.snapshot().await;

        match select_fault(&state, &ctx.simulation) {
            Some(FaultKind::LowBattery) => {
                warn!("Battery low, shutting down");
                ctx.heartbeat.disable();
                Ok(OperationOutcome::Shutdown(ShutdownKind::Graceful))
            }
            Some(FaultKind::Crash) => {
                warn!("Unhandled exception");
                Ok(OperationOutcome::Shutdown(ShutdownKind::Fault))
            }
            Some(FaultKind::SensorFailure) => {
                warn!(
                    temperature = ctx.simulation.sensor_failed_temperature,
                    "Temperature sensor stopped working"
                );
                let mut delta = Map::new();
                delta.insert(
                    "temperature".to_string(),
                    Value::from(ctx.simulation.sensor_failed_temperature),
                );
                ctx.shadow
                    .on_desired_update(&delta)
                    .await
                    .map_err(|e| OperationError::Shadow(e.to_string()))?;
                Ok(OperationOutcome::Completed)
            }
            Some(FaultKind::TelemetryBug) => {
                warn!("Minor bug in old firmware, can no longer update telemetry data");
                ctx.heartbeat.disable();
                Ok(OperationOutcome::Completed)
            }
            None => {
                info!("Device unaffected by fault injection");
                Ok(OperationOutcome::Completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::context_with_state;
    use serde_json::json;

    fn state(value: Value) -> ShadowState {
        match value {
            Value::Object(map) => ShadowState::new(map),
            _ => ShadowState::default(),
        }
    }

    #[test]
    fn test_fault_precedence() {
        let sim = SimulationSection::default();

        // low battery wins over everything
        let s = state(json!({"battery": 1, "firmware": "0.1", "location": "atl"}));
        assert_eq!(select_fault(&s, &sim), Some(FaultKind::LowBattery));

        let s = state(json!({"battery": 90, "firmware": "0.1", "location": "atl"}));
        assert_eq!(select_fault(&s, &sim), Some(FaultKind::Crash));

        let s = state(json!({"battery": 90, "firmware": "1.0", "location": "atl"}));
        assert_eq!(select_fault(&s, &sim), Some(FaultKind::SensorFailure));

        let s = state(json!({"battery": 90, "firmware": "1.0", "location": "nyc"}));
        assert_eq!(select_fault(&s, &sim), Some(FaultKind::TelemetryBug));

        let s = state(json!({"battery": 90, "firmware": "2.0", "location": "bos"}));
        assert_eq!(select_fault(&s, &sim), None);

        // threshold is exclusive
        let s = state(json!({"battery": 3, "firmware": "2.0", "location": "bos"}));
        assert_eq!(select_fault(&s, &sim), None);
    }

    #[tokio::test]
    async fn test_low_battery_shuts_down_gracefully() {
        let (ctx, _transport) =
            context_with_state(json!({"battery": 1, "firmware": "2.0", "location": "nyc"}));

        let outcome = Order66.execute(&json!({"operation": "ORDER_66"}), &ctx).await.unwrap();

        assert_eq!(outcome, OperationOutcome::Shutdown(ShutdownKind::Graceful));
        assert!(!ctx.heartbeat.is_enabled());
    }

    #[tokio::test]
    async fn test_oldest_firmware_crashes() {
        let (ctx, _transport) =
            context_with_state(json!({"battery": 90, "firmware": "0.1", "location": "nyc"}));

        let outcome = Order66.execute(&json!({"operation": "ORDER_66"}), &ctx).await.unwrap();

        assert_eq!(outcome, OperationOutcome::Shutdown(ShutdownKind::Fault));
        assert!(ctx.heartbeat.is_enabled());
    }

    #[tokio::test]
    async fn test_sensor_failure_pins_temperature() {
        let (ctx, transport) = context_with_state(
            json!({"battery": 90, "firmware": "2.0", "location": "atl", "temperature": 15}),
        );

        let outcome = Order66.execute(&json!({"operation": "ORDER_66"}), &ctx).await.unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert_eq!(ctx.shadow.get("temperature").await, Some(json!(100)));

        let reports = transport.published_json("$aws/things/test-device/shadow/update");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["state"]["reported"]["temperature"], 100);
        assert!(reports[0]["state"]["desired"].is_null());
    }

    #[tokio::test]
    async fn test_buggy_firmware_stops_heartbeats() {
        let (ctx, transport) =
            context_with_state(json!({"battery": 90, "firmware": "1.0", "location": "bos"}));

        let outcome = Order66.execute(&json!({"operation": "ORDER_66"}), &ctx).await.unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert!(!ctx.heartbeat.is_enabled());
        assert!(transport.published().is_empty());
    }
}
