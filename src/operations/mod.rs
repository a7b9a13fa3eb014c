//! Job operations
//!
//! A job document names an `operation`; the [`OperationRegistry`] maps that name
//! to a handler. Names without a registered handler run the no-op fallback and
//! succeed. A document without an `operation` string is rejected before any
//! handler runs.

use crate::config::SimulationSection;
use crate::device::{HeartbeatSwitch, ShadowStore};
use crate::error::OperationError;
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub mod builtin;

/// Handler for one kind of job operation
#[async_trait]
pub trait Operation<T: Transport>: Send + Sync {
    /// Operation name as it appears in job documents
    fn name(&self) -> &str;

    /// Run the operation against the device
    async fn execute(
        &self,
        document: &Value,
        ctx: &OperationContext<T>,
    ) -> Result<OperationOutcome, OperationError>;
}

/// What a handler may touch while it runs
pub struct OperationContext<T: Transport> {
    pub shadow: Arc<ShadowStore<T>>,
    pub heartbeat: HeartbeatSwitch,
    pub simulation: SimulationSection,
}

impl<T: Transport> Clone for OperationContext<T> {
    fn clone(&self) -> Self {
        Self {
            shadow: self.shadow.clone(),
            heartbeat: self.heartbeat.clone(),
            simulation: self.simulation.clone(),
        }
    }
}

/// How a simulated shutdown ends the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Orderly power-off: disconnect, exit 0
    Graceful,
    /// Crash: no disconnect, exit 1
    Fault,
}

impl ShutdownKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownKind::Graceful => 0,
            ShutdownKind::Fault => 1,
        }
    }
}

/// Successful result of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    /// The session must cycle the connection once the job is reported
    RebootRequested,
    /// The device dies before the job can be reported
    Shutdown(ShutdownKind),
}

/// Result of running a job document through the registry
#[derive(Debug)]
pub enum ExecutionReport {
    /// The document has no `operation` string
    Rejected { reason: String },
    /// The handler returned an error
    Failed {
        operation: String,
        error: OperationError,
    },
    Finished {
        operation: String,
        outcome: OperationOutcome,
    },
}

/// Accepts any operation without doing anything
pub struct NoOpOperation;

#[async_trait]
impl<T: Transport> Operation<T> for NoOpOperation {
    fn name(&self) -> &str {
        "NOOP"
    }

    async fn execute(
        &self,
        document: &Value,
        _ctx: &OperationContext<T>,
    ) -> Result<OperationOutcome, OperationError> {
        let operation = document
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or_default();
        info!(operation, "Successfully performed operation on device");
        Ok(OperationOutcome::Completed)
    }
}

/// Operation name to handler map with a no-op fallback
pub struct OperationRegistry<T: Transport> {
    operations: HashMap<String, Arc<dyn Operation<T>>>,
    fallback: Arc<dyn Operation<T>>,
}

impl<T: Transport + 'static> OperationRegistry<T> {
    /// Empty registry: every named operation falls through to the no-op
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
            fallback: Arc::new(NoOpOperation),
        }
    }

    /// Registry with FIRMWARE_UPGRADE, REBOOT and ORDER_66
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtin::FirmwareUpgrade));
        registry.register(Arc::new(builtin::Reboot));
        registry.register(Arc::new(builtin::Order66));
        registry
    }

    /// Add or replace a handler under its own name
    pub fn register(&mut self, operation: Arc<dyn Operation<T>>) {
        let name = operation.name().to_string();
        debug!(operation = %name, "Registered operation");
        self.operations.insert(name, operation);
    }

    /// Handler for `name`, or the fallback
    pub fn resolve(&self, name: &str) -> Arc<dyn Operation<T>> {
        self.operations
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn list_operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a job document through the matching handler
    pub async fn execute(&self, document: &Value, ctx: &OperationContext<T>) -> ExecutionReport {
        let Some(operation) = document.get("operation").and_then(Value::as_str) else {
            return ExecutionReport::Rejected {
                reason: "Missing operation to be performed in job".to_string(),
            };
        };

        match self.resolve(operation).execute(document, ctx).await {
            Ok(outcome) => ExecutionReport::Finished {
                operation: operation.to_string(),
                outcome,
            },
            Err(error) => ExecutionReport::Failed {
                operation: operation.to_string(),
                error,
            },
        }
    }
}

impl<T: Transport + 'static> Default for OperationRegistry<T> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::device::ShadowState;
    use crate::protocol::TopicBuilder;
    use crate::testing::mocks::MockTransport;

    /// Context over a connected mock with the given device state
    pub(crate) fn context_with_state(
        state: Value,
    ) -> (OperationContext<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::connected());
        let heartbeat = HeartbeatSwitch::new(true);
        let values = match state {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let shadow = Arc::new(ShadowStore::new(
            transport.clone(),
            TopicBuilder::aws("test-device"),
            ShadowState::new(values),
            heartbeat.clone(),
        ));
        let ctx = OperationContext {
            shadow,
            heartbeat,
            simulation: SimulationSection::default(),
        };
        (ctx, transport)
    }
}
