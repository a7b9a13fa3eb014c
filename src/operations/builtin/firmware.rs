//! FIRMWARE_UPGRADE: install the version named in the job document

use crate::error::OperationError;
use crate::operations::{Operation, OperationContext, OperationOutcome};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

pub const FIRMWARE_KEY: &str = "firmware";
const VERSION_PARAM: &str = "firmware_version";

pub struct FirmwareUpgrade;

impl FirmwareUpgrade {
    /// Extract the target version from a job document
    fn target_version(document: &Value) -> Result<&str, OperationError> {
        let version = document
            .get(VERSION_PARAM)
            .ok_or_else(|| OperationError::MissingParameter(VERSION_PARAM.to_string()))?;

        match version.as_str() {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(OperationError::InvalidParameter {
                name: VERSION_PARAM.to_string(),
                reason: format!("expected a non-empty string, got {version}"),
            }),
        }
    }
}

#[async_trait]
impl<T: Transport> Operation<T> for FirmwareUpgrade {
    fn name(&self) -> &str {
        "FIRMWARE_UPGRADE"
    }

    async fn execute(
        &self,
        document: &Value,
        ctx: &OperationContext<T>,
    ) -> Result<OperationOutcome, OperationError> {
        let version = Self::target_version(document)?;

        ctx.shadow
            .set_and_report(FIRMWARE_KEY, Value::from(version))
            .await
            .map_err(|e| OperationError::Shadow(e.to_string()))?;

        info!(firmware = %version, "Firmware upgraded");
        Ok(OperationOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::context_with_state;
    use serde_json::json;

    #[tokio::test]
    async fn test_upgrade_sets_and_reports_firmware() {
        let (ctx, transport) = context_with_state(json!({"firmware": "1.0", "battery": 30}));

        let outcome = FirmwareUpgrade
            .execute(
                &json!({"operation": "FIRMWARE_UPGRADE", "firmware_version": "2.0"}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert_eq!(ctx.shadow.get("firmware").await, Some(json!("2.0")));
        assert_eq!(ctx.shadow.get("battery").await, Some(json!(30)));

        // only the changed key is reported
        let reports = transport.published_json("$aws/things/test-device/shadow/update");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["state"]["reported"], json!({"firmware": "2.0"}));
        assert!(reports[0]["state"].get("desired").is_none());
    }

    #[tokio::test]
    async fn test_missing_version_fails() {
        let (ctx, transport) = context_with_state(json!({"firmware": "1.0"}));

        let result = FirmwareUpgrade
            .execute(&json!({"operation": "FIRMWARE_UPGRADE"}), &ctx)
            .await;

        assert!(matches!(result, Err(OperationError::MissingParameter(p)) if p == "firmware_version"));
        assert_eq!(ctx.shadow.get("firmware").await, Some(json!("1.0")));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_non_string_version_fails() {
        let (ctx, _transport) = context_with_state(json!({"firmware": "1.0"}));

        let result = FirmwareUpgrade
            .execute(
                &json!({"operation": "FIRMWARE_UPGRADE", "firmware_version": 2}),
                &ctx,
            )
            .await;

        assert!(matches!(result, Err(OperationError::InvalidParameter { .. })));
    }

    #[tokio::test]
    async fn test_report_failure_fails_operation() {
        let (ctx, transport) = context_with_state(json!({"firmware": "1.0"}));
        transport.fail_publishes(true);

        let result = FirmwareUpgrade
            .execute(
                &json!({"operation": "FIRMWARE_UPGRADE", "firmware_version": "1.5"}),
                &ctx,
            )
            .await;

        assert!(matches!(result, Err(OperationError::Shadow(_))));
    }
}
