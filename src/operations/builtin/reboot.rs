//! REBOOT: ask the session to cycle the connection

use crate::error::OperationError;
use crate::operations::{Operation, OperationContext, OperationOutcome};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// The reconnect itself runs in the session after SUCCEEDED is reported.
pub struct Reboot;

#[async_trait]
impl<T: Transport> Operation<T> for Reboot {
    fn name(&self) -> &str {
        "REBOOT"
    }

    async fn execute(
        &self,
        _document: &Value,
        _ctx: &OperationContext<T>,
    ) -> Result<OperationOutcome, OperationError> {
        info!("Rebooting device");
        Ok(OperationOutcome::RebootRequested)
    }
}
