//! Impure I/O for the MQTT client
//!
//! `MqttClient` owns a `rumqttc` client and a background task polling its event
//! loop. The task tracks connection state, resubscribes after the event loop
//! reconnects and hands inbound publishes to subscription callbacks.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{dispatch, EventRoute, MessageHandler, SubscriptionTable};
use crate::config::MqttSection;
use crate::transport::{InboundMessage, MessageCallback, QoS, Transport};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT transport client for a single device
pub struct MqttClient {
    client_id: String,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    client: Mutex<Option<AsyncClient>>,
    subscriptions: Arc<Mutex<SubscriptionTable>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Create a client. Broker URL and TLS files are checked here, no I/O to
    /// the broker happens until [`Transport::connect`].
    pub fn new(client_id: &str, config: MqttSection) -> Result<Self, MqttError> {
        configure_mqtt_options(client_id, &config)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Ok(Self {
            client_id: client_id.to_string(),
            config,
            reconnect_config: ReconnectConfig::default(),
            client: Mutex::new(None),
            subscriptions: Arc::new(Mutex::new(SubscriptionTable::new())),
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
        })
    }

    /// Override the background reconnection policy
    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    fn transition(&self, event: ConnectionEvent) {
        transition(&self.client_id, &self.state_tx, event);
    }

    /// Wait for the event-loop task to report ConnAck
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason)
                    | ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::Reconnecting(_) => {
                        return Err(MqttError::ConnectionFailed(
                            "Connection attempt failed".to_string(),
                        ));
                    }
                    ConnectionState::Idle | ConnectionState::Connecting => continue,
                }
            }
        })
        .await;

        confirmation.unwrap_or(Err(MqttError::ConnectTimeout(timeout)))
    }

    /// Stop the event-loop task without a DISCONNECT handshake
    async fn abort_event_loop(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            handle.abort();
        }
        self.client.lock().await.take();
    }

    /// Clone the client handle if the connection can be used
    async fn active_client(&self) -> Result<AsyncClient, MqttError> {
        let state = self.state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }

        self.client
            .lock()
            .await
            .clone()
            .ok_or(MqttError::NotConnected { state })
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

fn transition(client_id: &str, state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    let next = HealthMonitor::determine_next_state(event);
    let previous = state_tx.send_replace(next.clone());
    HealthMonitor::log_state_transition(client_id, &previous, &next);
}

/// Everything the event-loop task needs besides the event loop itself
struct EventLoopContext {
    client_id: String,
    client: AsyncClient,
    subscriptions: Arc<Mutex<SubscriptionTable>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    reconnect_config: ReconnectConfig,
}

impl EventLoopContext {
    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(client_id = %self.client_id, "MQTT event loop started");
        let mut reconnect_attempts = 0u32;

        loop {
            let event = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                event = event_loop.poll() => event,
            };

            match event {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        reconnect_attempts = 0;
                        transition(&self.client_id, &self.state_tx, ConnectionEvent::ConnAckReceived);
                        self.resubscribe().await;
                    }
                    EventRoute::MessageReceived { topic, payload, .. } => {
                        let callbacks = self.subscriptions.lock().await.matching(&topic);
                        dispatch(callbacks, InboundMessage { topic, payload });
                    }
                    EventRoute::Disconnected => {
                        transition(
                            &self.client_id,
                            &self.state_tx,
                            ConnectionEvent::DisconnectedByBroker,
                        );
                    }
                    EventRoute::DisconnectSent => {
                        transition(
                            &self.client_id,
                            &self.state_tx,
                            ConnectionEvent::ClientDisconnected,
                        );
                        break;
                    }
                    EventRoute::SubscriptionConfirmed { packet_id } => {
                        debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                    }
                    EventRoute::InfrastructureEvent(event) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    transition(
                        &self.client_id,
                        &self.state_tx,
                        ConnectionEvent::NetworkError(e.to_string()),
                    );

                    let decision = HealthMonitor::should_attempt_reconnection(
                        reconnect_attempts,
                        &self.reconnect_config,
                        *shutdown_rx.borrow(),
                    );
                    match decision {
                        ReconnectionDecision::Proceed { attempt, delay_ms } => {
                            reconnect_attempts = attempt;
                            transition(
                                &self.client_id,
                                &self.state_tx,
                                ConnectionEvent::ReconnectionStarted(attempt),
                            );
                            if !interruptible_sleep(&mut shutdown_rx, delay_ms).await {
                                break;
                            }
                        }
                        ReconnectionDecision::AbortShutdownRequested => break,
                        ReconnectionDecision::AbortMaxAttemptsExceeded => {
                            transition(
                                &self.client_id,
                                &self.state_tx,
                                ConnectionEvent::PermanentFailure(format!(
                                    "Max reconnection attempts ({reconnect_attempts}) exceeded"
                                )),
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(client_id = %self.client_id, "MQTT event loop stopped");
    }

    /// Re-issue every known subscription after a (re)connect. Uses the
    /// non-blocking request path since this runs on the task that drains it.
    async fn resubscribe(&self) {
        let filters = self.subscriptions.lock().await.filters();
        for (filter, qos) in filters {
            match self.client.try_subscribe(filter.clone(), qos) {
                Ok(()) => debug!(target: "mqtt_transport", filter = %filter, "Re-subscribed"),
                Err(e) => error!(filter = %filter, error = %e, "Failed to re-subscribe"),
            }
        }
    }
}

/// Sleep unless shutdown is requested first. Returns false on shutdown.
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self) -> Result<(), MqttError> {
        if self.is_connected() {
            return Ok(());
        }
        self.abort_event_loop().await;

        let options = configure_mqtt_options(&self.client_id, &self.config)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.state_tx.send_replace(ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();

        info!(
            client_id = %self.client_id,
            broker = %self.config.broker_url,
            "Connecting to MQTT broker"
        );

        let context = EventLoopContext {
            client_id: self.client_id.clone(),
            client: client.clone(),
            subscriptions: self.subscriptions.clone(),
            state_tx: self.state_tx.clone(),
            reconnect_config: self.reconnect_config.clone(),
        };
        let span = crate::mqtt_span!(client_id = %self.client_id);
        let handle = tokio::spawn(context.run(event_loop, shutdown_rx).instrument(span));

        *self.client.lock().await = Some(client);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *self.event_loop_handle.lock().await = Some(handle);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, timeout).await {
            self.abort_event_loop().await;
            self.transition(ConnectionEvent::NetworkError(e.to_string()));
            return Err(e);
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                warn!(client_id = %self.client_id, error = %e, "DISCONNECT could not be queued");
            }
        }

        let handle = self.event_loop_handle.lock().await.take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Event loop task ended with error");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
            }
        }
        self.shutdown_tx.lock().await.take();

        if !matches!(
            *self.state_rx.borrow(),
            ConnectionState::Disconnected(_) | ConnectionState::Idle
        ) {
            self.transition(ConnectionEvent::ClientDisconnected);
        }
        info!(client_id = %self.client_id, "MQTT client disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError> {
        let client = self.active_client().await?;
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", topic = %topic, ?qos, "Queued publish");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), MqttError> {
        let client = self.active_client().await?;
        self.subscriptions
            .lock()
            .await
            .insert(topic_filter, qos, callback);

        client
            .subscribe(topic_filter, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        info!(topic_filter = %topic_filter, ?qos, "Subscribed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_rx.borrow(), ConnectionState::Connected)
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }
}
