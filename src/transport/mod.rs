//! Transport layer for device communication
//!
//! The device core only talks to the [`Transport`] trait. The MQTT implementation
//! lives in [`mqtt`]; tests use [`crate::testing::mocks::MockTransport`].

use std::sync::Arc;

pub mod mqtt;

pub use mqtt::ConnectionState;
pub use rumqttc::v5::mqttbytes::QoS;

/// Message delivered to a subscription callback
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every message matching a subscription filter.
///
/// Callbacks run on the transport's delivery task and must not block.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Publish/subscribe transport used by the device
///
/// All methods take `&self` so one transport can be shared between the session,
/// the shadow store, the job coordinator and the heartbeat loop, and still be
/// cycled by a reboot.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker, waiting a bounded time for the acknowledgment
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Queue a message for delivery. Does not wait for a broker acknowledgment.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter (`+` and `#` allowed). Subscribing the same
    /// filter again replaces its callback.
    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;
}
