//! Fleet Device Agent
//!
//! A simulated IoT device that keeps a cloud device shadow in sync and executes
//! remote jobs over MQTT v5.
//!
//! # Overview
//!
//! - [`protocol`]: shadow and jobs documents, topic layout
//! - [`transport`]: the [`transport::Transport`] trait and its `rumqttc` implementation
//! - [`device`]: shadow store, job coordinator, heartbeat loop and the session tying them together
//! - [`operations`]: the open registry of job operations
//! - [`observability`]: logging setup and process counters
//!
//! # Quick Start
//!
//! ```rust
//! use fleet_device_agent::config::DeviceConfig;
//! use fleet_device_agent::device::Session;
//! use fleet_device_agent::testing::MockTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(MockTransport::new());
//! let mut session = Session::new(DeviceConfig::local("sensor-001"), transport.clone());
//! session.start().await.unwrap();
//!
//! // the initial full state goes out right after the shadow listener is registered
//! assert_eq!(transport.published_on("$aws/things/sensor-001/shadow/update").len(), 1);
//! session.shutdown().await;
//! # });
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod operations;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DeviceConfig};
pub use device::{Session, SessionExit};
pub use error::{DeviceError, DeviceResult};
pub use operations::{Operation, OperationRegistry};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
