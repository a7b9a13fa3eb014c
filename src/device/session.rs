//! Device session: startup sequence, event dispatch, reboot and shutdown
//!
//! [`Session::run`] is the only consumer of inbound events. Job execution,
//! desired-state merges and reboots all happen on it, one event at a time; the
//! heartbeat task is the only other writer and meets the dispatcher at the
//! shadow store lock.

use super::heartbeat::HeartbeatLoop;
use super::jobs::{JobCoordinator, JobDirective};
use super::shadow::{HeartbeatSwitch, ShadowState, ShadowStore};
use super::{DeviceEvent, EventReceiver, EventSender};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::observability::metrics;
use crate::operations::{OperationContext, OperationRegistry, ShutdownKind};
use crate::protocol::TopicBuilder;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Why and how the session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExit {
    pub code: i32,
    pub reason: String,
}

impl SessionExit {
    fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

pub struct Session<T: Transport> {
    config: DeviceConfig,
    transport: Arc<T>,
    shadow: Arc<ShadowStore<T>>,
    jobs: JobCoordinator<T>,
    heartbeat: Arc<HeartbeatLoop<T>>,
    heartbeat_task: Option<JoinHandle<()>>,
    /// Set by a fault shutdown; a crashed device never disconnects cleanly
    crashed: bool,
    events_tx: EventSender,
    events_rx: EventReceiver,
}

impl<T: Transport + 'static> Session<T> {
    pub fn new(config: DeviceConfig, transport: Arc<T>) -> Self {
        Self::with_registry(config, transport, OperationRegistry::with_builtins())
    }

    /// Session with a custom operation registry
    pub fn with_registry(
        config: DeviceConfig,
        transport: Arc<T>,
        registry: OperationRegistry<T>,
    ) -> Self {
        let topics = TopicBuilder::new(
            &config.device.topic_root,
            &config.device.name,
            &config.device.heartbeat_prefix,
            config.device.shadow_name.as_deref(),
        );
        let switch = HeartbeatSwitch::new(config.heartbeat.enabled);
        let shadow = Arc::new(ShadowStore::new(
            transport.clone(),
            topics.clone(),
            ShadowState::initial(&config.shadow),
            switch.clone(),
        ));
        let context = OperationContext {
            shadow: shadow.clone(),
            heartbeat: switch,
            simulation: config.simulation.clone(),
        };
        let jobs = JobCoordinator::new(
            transport.clone(),
            topics.clone(),
            registry,
            context,
            config.jobs.clone(),
        );
        let heartbeat = Arc::new(HeartbeatLoop::new(
            transport.clone(),
            &topics,
            shadow.clone(),
            &config.heartbeat,
            &config.simulation,
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            transport,
            shadow,
            jobs,
            heartbeat,
            heartbeat_task: None,
            crashed: false,
            events_tx,
            events_rx,
        }
    }

    pub fn shadow(&self) -> &Arc<ShadowStore<T>> {
        &self.shadow
    }

    pub fn heartbeat_switch(&self) -> &HeartbeatSwitch {
        self.shadow.heartbeat_switch()
    }

    pub fn jobs(&self) -> &JobCoordinator<T> {
        &self.jobs
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatLoop<T>> {
        &self.heartbeat
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Connect, retrying a bounded number of times
    pub async fn connect_with_retry(&self) -> DeviceResult<()> {
        let attempts = self.config.mqtt.connect_attempts.max(1);
        let delay = Duration::from_millis(self.config.mqtt.connect_retry_delay_ms);

        for attempt in 1..=attempts {
            metrics().connect_attempted();
            match self.transport.connect().await {
                Ok(()) => {
                    info!(attempt, "Connected to broker");
                    return Ok(());
                }
                Err(e) => {
                    metrics().connect_failed();
                    warn!(attempt, max_attempts = attempts, error = %e, "Connection attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(attempts, "Giving up on connecting");
        Err(DeviceError::ConnectRetriesExhausted { attempts })
    }

    /// Bring the device online and start heartbeats
    pub async fn start(&mut self) -> DeviceResult<()> {
        let span = crate::session_span!(thing_name = %self.config.device.name);
        async {
            self.connect_with_retry().await?;
            self.shadow.register_listener(&self.events_tx).await?;
            self.shadow.publish_full_state().await?;
            self.jobs.discover_outstanding(&self.events_tx).await?;
            self.jobs.subscribe_to_notifications(&self.events_tx).await?;
            Ok::<_, DeviceError>(())
        }
        .instrument(span)
        .await?;

        self.heartbeat_task = Some(self.heartbeat.clone().spawn());
        info!(thing_name = %self.config.device.name, "Device online");
        Ok(())
    }

    /// Dispatch events until the session ends
    pub async fn run(&mut self) -> SessionExit {
        while let Some(event) = self.events_rx.recv().await {
            if let Some(exit) = self.dispatch_logged(event).await {
                return exit;
            }
        }
        SessionExit::new(0, "event channel closed")
    }

    /// Dispatch every event already queued, without waiting for more
    pub async fn process_pending(&mut self) -> Option<SessionExit> {
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(exit) = self.dispatch_logged(event).await {
                return Some(exit);
            }
        }
        None
    }

    async fn dispatch_logged(&mut self, event: DeviceEvent) -> Option<SessionExit> {
        let kind = event.kind();
        match self.dispatch(event).await {
            Ok(exit) => exit,
            Err(e) => {
                error!(kind, error = %e, "Event handling failed");
                None
            }
        }
    }

    /// Handle one inbound event. Returns the exit when the session is over.
    pub async fn dispatch(&mut self, event: DeviceEvent) -> DeviceResult<Option<SessionExit>> {
        debug!(kind = event.kind(), "Dispatching event");
        match event {
            DeviceEvent::ShadowAccepted(payload) => {
                self.shadow.on_update_accepted(&payload).await?;
                Ok(None)
            }
            DeviceEvent::JobList(payload) => {
                self.jobs.on_job_list(&payload).await?;
                Ok(None)
            }
            DeviceEvent::JobNotification(payload) => {
                self.jobs.on_notification(&payload).await?;
                Ok(None)
            }
            DeviceEvent::JobDetail { topic, payload } => {
                debug!(%topic, "Job detail received");
                match self.jobs.on_job_detail(&payload).await? {
                    JobDirective::Continue => Ok(None),
                    JobDirective::Reboot => match self.reboot().await {
                        Ok(()) => Ok(None),
                        Err(e) => {
                            error!(error = %e, "Reboot could not reconnect");
                            self.stop_heartbeat();
                            Ok(Some(SessionExit::new(1, format!("reboot failed: {e}"))))
                        }
                    },
                    JobDirective::Shutdown(kind) => Ok(Some(self.power_off(kind).await)),
                }
            }
        }
    }

    /// Cycle the connection. Shadow state survives untouched.
    pub async fn reboot(&self) -> DeviceResult<()> {
        let delay = Duration::from_millis(self.config.simulation.reboot_delay_ms);
        let switch = self.heartbeat_switch();
        let was_enabled = switch.is_enabled();

        switch.disable();
        tokio::time::sleep(delay).await;

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Disconnect before reboot failed");
        }
        info!("Device powered down for reboot");
        tokio::time::sleep(delay).await;

        self.connect_with_retry().await?;
        self.shadow.register_listener(&self.events_tx).await?;
        self.jobs.discover_outstanding(&self.events_tx).await?;
        self.jobs.subscribe_to_notifications(&self.events_tx).await?;

        switch.set(was_enabled);
        metrics().rebooted();
        info!("Reboot complete");
        Ok(())
    }

    async fn power_off(&mut self, kind: ShutdownKind) -> SessionExit {
        self.stop_heartbeat();
        match kind {
            ShutdownKind::Graceful => {
                tokio::time::sleep(Duration::from_millis(
                    self.config.simulation.shutdown_delay_ms,
                ))
                .await;
                if let Err(e) = self.transport.disconnect().await {
                    warn!(error = %e, "Disconnect during shutdown failed");
                }
                info!("Device shut down");
                SessionExit::new(kind.exit_code(), "low battery shutdown")
            }
            ShutdownKind::Fault => {
                self.crashed = true;
                error!("Device crashed");
                SessionExit::new(kind.exit_code(), "simulated crash")
            }
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }

    /// Stop heartbeats and disconnect, unless the device crashed
    pub async fn shutdown(&mut self) {
        self.stop_heartbeat();
        if self.crashed {
            debug!("Device crashed, leaving the connection to drop");
        } else if self.transport.is_connected() {
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Disconnect during shutdown failed");
            }
        }

        match serde_json::to_string(&metrics().snapshot()) {
            Ok(snapshot) => info!(metrics = %snapshot, "Session closed"),
            Err(e) => warn!(error = %e, "Could not serialize metrics"),
        }
    }
}
