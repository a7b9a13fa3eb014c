//! Event routing and subscription callback dispatch
//!
//! Pure functions over `rumqttc` events plus the table mapping topic filters to
//! callbacks. The table is shared with the in-memory mock transport.

use crate::protocol::topic_matches;
use crate::transport::{InboundMessage, MessageCallback, QoS};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use tracing::debug;

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    SubscriptionConfirmed {
        packet_id: u16,
    },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    OutgoingEvent,
}

struct Subscription {
    filter: String,
    qos: QoS,
    callback: MessageCallback,
}

/// Topic filters and their callbacks, in subscription order
#[derive(Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription, replacing any existing one with the same filter
    pub fn insert(&mut self, filter: &str, qos: QoS, callback: MessageCallback) {
        if let Some(existing) = self.entries.iter_mut().find(|s| s.filter == filter) {
            existing.qos = qos;
            existing.callback = callback;
            return;
        }
        self.entries.push(Subscription {
            filter: filter.to_string(),
            qos,
            callback,
        });
    }

    /// Callbacks whose filter matches the topic
    pub fn matching(&self, topic: &str) -> Vec<MessageCallback> {
        self.entries
            .iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .map(|s| s.callback.clone())
            .collect()
    }

    /// Every filter with its QoS, for resubscribing after a reconnect
    pub fn filters(&self) -> Vec<(String, QoS)> {
        self.entries
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hand a message to every matching callback. Returns how many were invoked.
///
/// Callbacks are collected first so the caller can release any lock on the table
/// before running them.
pub fn dispatch(callbacks: Vec<MessageCallback>, message: InboundMessage) -> usize {
    let count = callbacks.len();
    if count == 0 {
        debug!(topic = %message.topic, "No subscription matches inbound message");
        return 0;
    }

    let mut callbacks = callbacks.into_iter();
    // the last callback takes ownership of the message
    for _ in 1..count {
        if let Some(callback) = callbacks.next() {
            callback(message.clone());
        }
    }
    if let Some(callback) = callbacks.next() {
        callback(message);
    }
    count
}
