//! ORDER_66 fault injection through a running session


use fleet_device_agent::transport::Transport;
use serde_json::json;
use test_helpers::*;

#[tokio::test]
async fn test_low_battery_shuts_down_cleanly() {
    let (mut session, transport) = started_session_with(test_config(1, "0.1", "atl")).await;

    deliver_job(&transport, "o66-1", json!({"operation": "ORDER_66"}));
    let exit = session.process_pending().await.expect("device shuts down");

    assert_eq!(exit.code, 0);
    assert!(!session.heartbeat_switch().is_enabled());
    assert!(!session.is_heartbeat_running());
    assert_eq!(transport.disconnect_count(), 1);
    // the device dies mid-job, so only the acknowledgment went out
    assert_eq!(job_statuses(&transport, "o66-1"), vec!["IN_PROGRESS"]);
}

#[tokio::test]
async fn test_oldest_firmware_crashes_without_disconnect() {
    let (mut session, transport) = started_session_with(test_config(90, "0.1", "nyc")).await;

    deliver_job(&transport, "o66-2", json!({"operation": "ORDER_66"}));
    let exit = session.process_pending().await.expect("device crashes");

    assert_eq!(exit.code, 1);
    assert_eq!(transport.disconnect_count(), 0);
    assert_eq!(job_statuses(&transport, "o66-2"), vec!["IN_PROGRESS"]);
}

#[tokio::test]
async fn test_shutdown_after_crash_leaves_connection_open() {
    let (mut session, transport) = started_session_with(test_config(90, "0.1", "nyc")).await;

    deliver_job(&transport, "o66-7", json!({"operation": "ORDER_66"}));
    let exit = session.process_pending().await.expect("device crashes");
    session.shutdown().await;

    assert_eq!(exit.code, 1);
    assert_eq!(transport.disconnect_count(), 0);
    assert!(transport.is_connected());
    assert!(!session.is_heartbeat_running());
}

#[tokio::test]
async fn test_events_after_shutdown_are_not_processed() {
    let (mut session, transport) = started_session_with(test_config(1, "2.0", "nyc")).await;

    deliver_job(&transport, "o66-3", json!({"operation": "ORDER_66"}));
    deliver_job(&transport, "later", json!({"operation": "NOOP"}));
    let exit = session.process_pending().await.expect("device shuts down");

    assert_eq!(exit.code, 0);
    assert!(job_statuses(&transport, "later").is_empty());
}

#[tokio::test]
async fn test_sensor_failure_pins_temperature() {
    let (mut session, transport) = started_session_with(test_config(90, "2.0", "atl")).await;

    deliver_job(&transport, "o66-4", json!({"operation": "ORDER_66"}));
    assert_eq!(session.process_pending().await, None);

    assert_eq!(job_statuses(&transport, "o66-4"), vec!["IN_PROGRESS", "SUCCEEDED"]);
    assert_eq!(session.shadow().get("temperature").await, Some(json!(100)));
    let reports = shadow_reports(&transport);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["state"]["reported"]["temperature"], 100);
    assert!(reports[0]["state"]["desired"].is_null());

    // a stuck sensor no longer drifts
    transport.clear_published();
    session.heartbeat().tick().await;
    assert!(shadow_reports(&transport).is_empty());
    assert_eq!(session.shadow().get("temperature").await, Some(json!(100)));

    session.shutdown().await;
}

#[tokio::test]
async fn test_buggy_firmware_stops_heartbeats_only() {
    let (mut session, transport) = started_session_with(test_config(90, "1.0", "nyc")).await;

    deliver_job(&transport, "o66-5", json!({"operation": "ORDER_66"}));
    assert_eq!(session.process_pending().await, None);

    assert_eq!(job_statuses(&transport, "o66-5"), vec!["IN_PROGRESS", "SUCCEEDED"]);
    assert!(!session.heartbeat_switch().is_enabled());
    assert!(transport.is_connected());

    transport.clear_published();
    session.heartbeat().tick().await;
    assert!(transport.published().is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn test_healthy_device_is_unaffected() {
    let (mut session, transport) = started_session_with(test_config(30, "1.5", "bos")).await;
    let before = session.shadow().snapshot().await;

    deliver_job(&transport, "o66-6", json!({"operation": "ORDER_66"}));
    assert_eq!(session.process_pending().await, None);

    assert_eq!(job_statuses(&transport, "o66-6"), vec!["IN_PROGRESS", "SUCCEEDED"]);
    assert!(session.heartbeat_switch().is_enabled());
    assert_eq!(session.shadow().snapshot().await, before);

    session.shutdown().await;
}
