//! Mock transport for testing
//!
//! Records every publish and subscription, can be told to fail connects or
//! publishes, and delivers inbound messages to the registered callbacks the way
//! the MQTT event loop does.

use crate::transport::mqtt::SubscriptionTable;
use crate::transport::mqtt::message_handler::dispatch;
use crate::transport::{ConnectionState, InboundMessage, MessageCallback, QoS, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;

/// A message recorded by [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[derive(Debug, Error)]
pub enum MockTransportError {
    #[error("Mock connection failure")]
    ConnectFailed,
    #[error("Mock publish failure on {0}")]
    PublishFailed(String),
    #[error("Mock transport not connected")]
    NotConnected,
}

/// In-memory [`Transport`]
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    failing_connects: AtomicU32,
    fail_publishes: AtomicBool,
    failing_topics: Mutex<HashSet<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<SubscriptionTable>,
}

impl MockTransport {
    /// Disconnected mock; call [`Transport::connect`] first
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    /// Fail the next `n` connect attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Make publishes to one exact topic fail until cleared
    pub fn fail_publishes_to(&self, topic: &str) {
        if let Ok(mut topics) = self.failing_topics.lock() {
            topics.insert(topic.to_string());
        }
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    /// Payloads published on `topic`, parsed as JSON
    pub fn published_json(&self, topic: &str) -> Vec<Value> {
        self.published_on(topic)
            .iter()
            .filter_map(PublishedMessage::json)
            .collect()
    }

    pub fn clear_published(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }

    /// Subscribed filters with their QoS
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .lock()
            .map(|table| table.filters())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.subscriptions().iter().any(|(f, _)| f == filter)
    }

    /// Deliver an inbound message. Returns how many callbacks ran.
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let callbacks = match self.subscriptions.lock() {
            Ok(table) => table.matching(topic),
            Err(_) => return 0,
        };
        dispatch(
            callbacks,
            InboundMessage {
                topic: topic.to_string(),
                payload: payload.into(),
            },
        )
    }

    /// Deliver a JSON document
    pub fn deliver_json(&self, topic: &str, document: &Value) -> usize {
        self.deliver(topic, document.to_string())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&self) -> Result<(), Self::Error> {
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(MockTransportError::ConnectFailed);
        }
        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if self.fail_publishes.load(Ordering::SeqCst)
            || self
                .failing_topics
                .lock()
                .map(|t| t.contains(topic))
                .unwrap_or(false)
        {
            return Err(MockTransportError::PublishFailed(topic.to_string()));
        }

        if let Ok(mut published) = self.published.lock() {
            published.push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                qos,
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if let Ok(mut table) = self.subscriptions.lock() {
            table.insert(topic_filter, qos, callback);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_records_publishes() {
        let transport = MockTransport::connected();
        transport
            .publish("a/b", b"{\"x\":1}".to_vec(), QoS::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(transport.published_on("a/b").len(), 1);
        assert_eq!(transport.published_json("a/b")[0]["x"], 1);
        transport.clear_published();
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MockTransport::new();
        let result = transport.publish("a", vec![], QoS::AtMostOnce).await;
        assert!(matches!(result, Err(MockTransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failures_are_consumed() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_deliver_matches_wildcards() {
        let transport = MockTransport::connected();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        transport
            .subscribe(
                "things/+/get/accepted",
                QoS::AtMostOnce,
                Arc::new(move |_: InboundMessage| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        assert_eq!(transport.deliver("things/job-1/get/accepted", "{}"), 1);
        assert_eq!(transport.deliver("things/job-1/update", "{}"), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
