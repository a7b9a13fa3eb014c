//! Configuration system for the fleet device agent
//!
//! Configuration is loaded from a TOML file. Every section except `[device]` and
//! `[mqtt]` is optional and falls back to the defaults of the fleet demo device.

use crate::protocol::topics::{validate_thing_name, ValidationError};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub shadow: ShadowSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub simulation: SimulationSection,
}

/// Device identity and topic addressing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Thing name, also used as serial number and MQTT client id
    pub name: String,
    /// Prefix of the shadow and jobs topics
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    /// Prefix of the heartbeat topic
    #[serde(default = "default_heartbeat_prefix")]
    pub heartbeat_prefix: String,
    /// Named shadow to sync instead of the classic device shadow
    pub shadow_name: Option<String>,
}

fn default_topic_root() -> String {
    "$aws/things".to_string()
}

fn default_heartbeat_prefix() -> String {
    "demofleet".to_string()
}

/// MQTT connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://` for plain TCP or `mqtts://` for TLS
    pub broker_url: String,
    /// Directory holding `rootCA.pem`, `certificate.pem` and `private.key`
    pub thing_path: Option<PathBuf>,
    /// Explicit CA path, overrides `thing_path`
    pub ca_path: Option<PathBuf>,
    /// Explicit client certificate path, overrides `thing_path`
    pub cert_path: Option<PathBuf>,
    /// Explicit private key path, overrides `thing_path`
    pub key_path: Option<PathBuf>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for ConnAck on each connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Connection attempts before startup is aborted
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay_ms: u64,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_retry_delay() -> u64 {
    1000
}

/// Credential file locations resolved from [`MqttSection`]
#[derive(Debug, Clone, PartialEq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl MqttSection {
    /// Resolve the CA and client certificate paths, if any are configured
    pub fn tls_files(&self) -> Option<TlsFiles> {
        let from_dir = |file: &str| self.thing_path.as_ref().map(|dir| dir.join(file));

        let ca = self.ca_path.clone().or_else(|| from_dir("rootCA.pem"))?;
        Some(TlsFiles {
            ca,
            cert: self.cert_path.clone().or_else(|| from_dir("certificate.pem")),
            key: self.key_path.clone().or_else(|| from_dir("private.key")),
        })
    }
}

/// Heartbeat loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Whether heartbeats are sent from startup
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower bound of the synthetic temperature drift
    #[serde(default = "default_temperature_min")]
    pub temperature_min: i64,
    /// Upper bound (inclusive) of the synthetic temperature drift
    #[serde(default = "default_temperature_max")]
    pub temperature_max: i64,
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_temperature_min() -> i64 {
    10
}

fn default_temperature_max() -> i64 {
    16
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            enabled: true,
            temperature_min: default_temperature_min(),
            temperature_max: default_temperature_max(),
        }
    }
}

impl HeartbeatSection {
    pub fn temperature_range(&self) -> RangeInclusive<i64> {
        self.temperature_min..=self.temperature_max
    }
}

/// Fixed initial shadow values. Unset fields are drawn at random at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShadowSection {
    pub battery: Option<i64>,
    pub firmware: Option<String>,
    pub temperature: Option<i64>,
    pub location: Option<String>,
}

/// Job status reporting policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsSection {
    /// Attempts for each terminal status update
    #[serde(default = "default_status_retry_attempts")]
    pub status_retry_attempts: u32,
    #[serde(default = "default_status_retry_delay")]
    pub status_retry_delay_ms: u64,
}

fn default_status_retry_attempts() -> u32 {
    3
}

fn default_status_retry_delay() -> u64 {
    500
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            status_retry_attempts: default_status_retry_attempts(),
            status_retry_delay_ms: default_status_retry_delay(),
        }
    }
}

/// Fault simulation knobs used by the REBOOT and ORDER_66 operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationSection {
    /// Outage length on each side of the reconnect
    pub reboot_delay_ms: u64,
    /// Pause between disabling heartbeats and a low-battery shutdown
    pub shutdown_delay_ms: u64,
    pub low_battery_threshold: f64,
    /// Firmware that crashes the device
    pub oldest_firmware: String,
    /// Firmware whose telemetry stops after a fault
    pub buggy_firmware: String,
    /// Location whose temperature sensor fails
    pub sensor_failure_location: String,
    /// Temperature reported by a failed sensor
    pub sensor_failed_temperature: i64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            reboot_delay_ms: 3000,
            shutdown_delay_ms: 2000,
            low_battery_threshold: 3.0,
            oldest_firmware: "0.1".to_string(),
            buggy_firmware: "1.0".to_string(),
            sensor_failure_location: "atl".to_string(),
            sensor_failed_temperature: 100,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid thing name: {0}")]
    InvalidThingName(#[from] ValidationError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that TOML typing cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_thing_name(&self.device.name)?;

        if let Some(name) = &self.device.shadow_name {
            validate_thing_name(name)?;
        }

        if self.mqtt.connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_attempts must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.temperature_min > self.heartbeat.temperature_max {
            return Err(ConfigError::InvalidConfig(format!(
                "heartbeat.temperature_min ({}) exceeds temperature_max ({})",
                self.heartbeat.temperature_min, self.heartbeat.temperature_max
            )));
        }

        if self.jobs.status_retry_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "jobs.status_retry_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Configuration for a plain-TCP local broker with no fault delays
    pub fn local(thing_name: &str) -> Self {
        Self {
            device: DeviceSection {
                name: thing_name.to_string(),
                topic_root: default_topic_root(),
                heartbeat_prefix: default_heartbeat_prefix(),
                shadow_name: None,
            },
            mqtt: MqttSection {
                broker_url: "mqtt://localhost:1883".to_string(),
                thing_path: None,
                ca_path: None,
                cert_path: None,
                key_path: None,
                username_env: None,
                password_env: None,
                keep_alive_secs: default_keep_alive(),
                connect_timeout_secs: default_connect_timeout(),
                connect_attempts: default_connect_attempts(),
                connect_retry_delay_ms: 0,
            },
            heartbeat: HeartbeatSection::default(),
            shadow: ShadowSection::default(),
            jobs: JobsSection {
                status_retry_attempts: default_status_retry_attempts(),
                status_retry_delay_ms: 0,
            },
            simulation: SimulationSection {
                reboot_delay_ms: 0,
                shutdown_delay_ms: 0,
                ..SimulationSection::default()
            },
        }
    }
}
