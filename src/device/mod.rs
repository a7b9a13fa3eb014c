//! The simulated device: shadow sync, job execution, heartbeats and the session
//! that wires them to a transport.
//!
//! Transport callbacks never touch device state. They wrap each inbound message
//! in a [`DeviceEvent`] and push it into one channel that
//! [`session::Session::run`] drains in order.

pub mod heartbeat;
pub mod jobs;
pub mod session;
pub mod shadow;

pub use heartbeat::{HeartbeatLoop, TickOutcome};
pub use jobs::{JobCoordinator, JobDirective};
pub use session::{Session, SessionExit};
pub use shadow::{HeartbeatSwitch, ShadowState, ShadowStore};

use crate::transport::{InboundMessage, MessageCallback};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Inbound message classified by the subscription it arrived on
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Shadow update accepted document
    ShadowAccepted(Vec<u8>),
    /// Reply to the pending-jobs list request
    JobList(Vec<u8>),
    /// Reply to a job describe request
    JobDetail { topic: String, payload: Vec<u8> },
    /// Pending-jobs notification
    JobNotification(Vec<u8>),
}

impl DeviceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::ShadowAccepted(_) => "shadow_accepted",
            DeviceEvent::JobList(_) => "job_list",
            DeviceEvent::JobDetail { .. } => "job_detail",
            DeviceEvent::JobNotification(_) => "job_notification",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

/// Subscription callback that forwards every message into the event channel
pub(crate) fn forward_to(
    events: &EventSender,
    wrap: fn(InboundMessage) -> DeviceEvent,
) -> MessageCallback {
    let events = events.clone();
    Arc::new(move |message: InboundMessage| {
        let event = wrap(message);
        let kind = event.kind();
        if events.send(event).is_err() {
            debug!(kind, "Event channel closed, dropping inbound message");
        }
    })
}
