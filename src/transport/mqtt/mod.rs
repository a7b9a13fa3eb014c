//! MQTT v5 transport built on `rumqttc`
//!
//! Pure logic is kept apart from I/O:
//!
//! - [`connection`] - connection state, options and reconnect backoff
//! - [`message_handler`] - event routing and the subscription table
//! - [`health_monitor`] - reconnection decisions and state transitions
//! - [`client`] - the event-loop task and the [`crate::transport::Transport`] impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use fleet_device_agent::config::DeviceConfig;
//! use fleet_device_agent::transport::mqtt::MqttClient;
//! use fleet_device_agent::transport::{InboundMessage, QoS, Transport};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::local("sensor-001");
//! let client = MqttClient::new("sensor-001", config.mqtt.clone())?;
//! client.connect().await?;
//! client
//!     .subscribe("demofleet/+/heartbeat", QoS::AtMostOnce, Arc::new(|msg: InboundMessage| {
//!         println!("{} is alive", msg.topic);
//!     }))
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler, SubscriptionTable};
