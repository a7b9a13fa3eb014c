//! Configuration loading and validation tests
//!
//! Tests focus on the behavior of loading a device configuration file: defaults,
//! overrides and the errors a broken file produces.

use fleet_device_agent::config::{ConfigError, DeviceConfig};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_minimal_file_gets_demo_defaults() {
    let file = write_config(
        r#"
[device]
name = "sensor-001"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.device.name, "sensor-001");
    assert_eq!(config.device.topic_root, "$aws/things");
    assert_eq!(config.device.heartbeat_prefix, "demofleet");
    assert_eq!(config.heartbeat.interval_secs, 3);
    assert!(config.heartbeat.enabled);
    assert_eq!(config.heartbeat.temperature_range(), 10..=16);
    assert_eq!(config.mqtt.connect_attempts, 5);
    assert_eq!(config.jobs.status_retry_attempts, 3);
    assert_eq!(config.simulation.sensor_failed_temperature, 100);
    assert_eq!(config.simulation.oldest_firmware, "0.1");
    assert!(config.shadow.battery.is_none());
}

#[test]
fn test_full_file_overrides_everything() {
    let file = write_config(
        r#"
[device]
name = "sensor-002"
topic_root = "fleet/things"
heartbeat_prefix = "plant7"
shadow_name = "telemetry"

[mqtt]
broker_url = "mqtts://broker.example.com:8883"
thing_path = "/opt/fleet/sensor-002"
username_env = "FLEET_USER"
keep_alive_secs = 30
connect_attempts = 2
connect_retry_delay_ms = 250

[heartbeat]
interval_secs = 10
enabled = false
temperature_min = 18
temperature_max = 22

[shadow]
battery = 1
firmware = "0.1"
location = "atl"

[jobs]
status_retry_attempts = 5
status_retry_delay_ms = 100

[simulation]
reboot_delay_ms = 10
low_battery_threshold = 5.5
"#,
    );

    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.device.shadow_name.as_deref(), Some("telemetry"));
    assert_eq!(config.mqtt.connect_attempts, 2);
    assert_eq!(config.mqtt.username_env.as_deref(), Some("FLEET_USER"));
    assert!(!config.heartbeat.enabled);
    assert_eq!(config.heartbeat.temperature_range(), 18..=22);
    assert_eq!(config.shadow.battery, Some(1));
    assert_eq!(config.shadow.temperature, None);
    assert_eq!(config.jobs.status_retry_attempts, 5);
    assert_eq!(config.simulation.reboot_delay_ms, 10);
    assert_eq!(config.simulation.low_battery_threshold, 5.5);
    // unset simulation keys keep their defaults
    assert_eq!(config.simulation.shutdown_delay_ms, 2000);

    let tls = config.mqtt.tls_files().unwrap();
    assert_eq!(tls.ca, PathBuf::from("/opt/fleet/sensor-002/rootCA.pem"));
    assert_eq!(
        tls.key,
        Some(PathBuf::from("/opt/fleet/sensor-002/private.key"))
    );
}

#[test]
fn test_missing_file_is_read_error() {
    let result = DeviceConfig::load_from_file(std::path::Path::new("/nonexistent/device.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_missing_mqtt_section_is_parse_error() {
    let file = write_config(
        r#"
[device]
name = "sensor-001"
"#,
    );

    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_thing_name_rejected() {
    let file = write_config(
        r#"
[device]
name = "sensor/001"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidThingName(_))));
}

#[test]
fn test_inverted_temperature_range_rejected() {
    let file = write_config(
        r#"
[device]
name = "sensor-001"

[mqtt]
broker_url = "mqtt://localhost:1883"

[heartbeat]
temperature_min = 20
temperature_max = 10
"#,
    );

    match DeviceConfig::load_from_file(file.path()) {
        Err(ConfigError::InvalidConfig(message)) => {
            assert!(message.contains("temperature_min"));
        }
        other => panic!("Expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_zero_connect_attempts_rejected() {
    let file = write_config(
        r#"
[device]
name = "sensor-001"

[mqtt]
broker_url = "mqtt://localhost:1883"
connect_attempts = 0
"#,
    );

    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_credentials_read_from_environment() {
    let file = write_config(
        r#"
[device]
name = "sensor-001"

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "FLEET_TEST_CONFIG_USER"
password_env = "FLEET_TEST_CONFIG_PASS_UNSET"
"#,
    );

    std::env::set_var("FLEET_TEST_CONFIG_USER", "device-user");
    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.get_mqtt_username().as_deref(), Some("device-user"));
    assert_eq!(config.get_mqtt_password(), None);
    std::env::remove_var("FLEET_TEST_CONFIG_USER");
}

#[test]
fn test_local_config_is_valid() {
    let config = DeviceConfig::local("sensor-003");
    config.validate().unwrap();
    assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
    assert_eq!(config.simulation.reboot_delay_ms, 0);
}
