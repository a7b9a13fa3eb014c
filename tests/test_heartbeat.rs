//! Heartbeat ticks driven against a started session


use fleet_device_agent::device::TickOutcome;
use fleet_device_agent::transport::QoS;
use serde_json::json;
use test_helpers::*;

#[tokio::test]
async fn test_enabled_tick_merges_exactly_once() {
    let (session, transport) = started_session().await;

    let outcome = session.heartbeat().tick().await;

    let TickOutcome::Sent { temperature: Some(t) } = outcome else {
        panic!("expected a drifted temperature, got {outcome:?}");
    };
    let beats = transport.published_on(&format!("demofleet/{THING}/heartbeat"));
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].qos, QoS::AtLeastOnce);

    let reports = shadow_reports(&transport);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["state"]["reported"]["temperature"], t);
    assert_eq!(session.shadow().get("temperature").await, Some(json!(t)));
}

#[tokio::test]
async fn test_disabled_by_desired_state() {
    let (mut session, transport) = started_session().await;

    transport.deliver_json(
        &topic("shadow/update/accepted"),
        &json!({"state": {"desired": {"heartbeat": false}}}),
    );
    session.process_pending().await;
    transport.clear_published();

    assert_eq!(session.heartbeat().tick().await, TickOutcome::Disabled);
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_configured_prefix_and_range() {
    let mut config = test_config(90, "2.0", "bos");
    config.device.heartbeat_prefix = "plant7".to_string();
    config.heartbeat.temperature_min = 40;
    config.heartbeat.temperature_max = 40;
    let (session, transport) = started_session_with(config).await;

    assert_eq!(
        session.heartbeat().tick().await,
        TickOutcome::Sent { temperature: Some(40) }
    );
    assert_eq!(transport.published_on(&format!("plant7/{THING}/heartbeat")).len(), 1);
}

#[tokio::test]
async fn test_heartbeat_disabled_in_config() {
    let mut config = test_config(90, "2.0", "bos");
    config.heartbeat.enabled = false;
    let (session, transport) = started_session_with(config).await;

    assert_eq!(session.heartbeat().tick().await, TickOutcome::Disabled);
    assert!(transport.published().is_empty());
}
