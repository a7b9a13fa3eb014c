//! Job discovery and execution
//!
//! Jobs arrive two ways: the list reply to the request sent at (re)connect, and
//! notifications pushed while connected. Both only yield job ids; the coordinator
//! asks for each execution's document and runs it when the detail reply comes
//! back through the dispatcher.

use super::{forward_to, DeviceEvent, EventSender};
use crate::config::JobsSection;
use crate::error::{sanitize_error_message, DeviceError, DeviceResult};
use crate::observability::metrics;
use crate::operations::{
    ExecutionReport, OperationContext, OperationOutcome, OperationRegistry, ShutdownKind,
};
use crate::protocol::{
    DescribeJobExecutionRequest, DescribeJobExecutionResponse, JobExecution, JobListRequest,
    JobListResponse, JobNotification, JobStatus, JobStatusUpdate, TopicBuilder,
};
use crate::transport::{QoS, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

/// What the session does after a job detail has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDirective {
    Continue,
    /// Cycle the connection. The terminal status is already published.
    Reboot,
    /// End the process. No terminal status was published.
    Shutdown(ShutdownKind),
}

/// Tracks open job executions and reports their status
pub struct JobCoordinator<T: Transport> {
    transport: Arc<T>,
    topics: TopicBuilder,
    registry: OperationRegistry<T>,
    context: OperationContext<T>,
    open_jobs: Mutex<HashMap<String, JobExecution>>,
    retry: JobsSection,
}

impl<T: Transport + 'static> JobCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        topics: TopicBuilder,
        registry: OperationRegistry<T>,
        context: OperationContext<T>,
        retry: JobsSection,
    ) -> Self {
        Self {
            transport,
            topics,
            registry,
            context,
            open_jobs: Mutex::new(HashMap::new()),
            retry,
        }
    }

    /// Subscribe to list and detail replies, then ask for pending jobs
    pub async fn discover_outstanding(&self, events: &EventSender) -> DeviceResult<()> {
        self.transport
            .subscribe(
                &self.topics.job_list_accepted(),
                QoS::AtMostOnce,
                forward_to(events, |msg| DeviceEvent::JobList(msg.payload)),
            )
            .await
            .map_err(DeviceError::transport)?;

        self.transport
            .subscribe(
                &self.topics.job_detail_accepted_filter(),
                QoS::AtMostOnce,
                forward_to(events, |msg| DeviceEvent::JobDetail {
                    topic: msg.topic,
                    payload: msg.payload,
                }),
            )
            .await
            .map_err(DeviceError::transport)?;

        let request = JobListRequest::new();
        self.transport
            .publish(
                &self.topics.job_list(),
                serde_json::to_vec(&request)?,
                QoS::AtMostOnce,
            )
            .await
            .map_err(DeviceError::transport)?;

        info!(client_token = %request.client_token, "Requested outstanding jobs");
        Ok(())
    }

    pub async fn subscribe_to_notifications(&self, events: &EventSender) -> DeviceResult<()> {
        let topic = self.topics.job_notify();
        self.transport
            .subscribe(
                &topic,
                QoS::AtMostOnce,
                forward_to(events, |msg| DeviceEvent::JobNotification(msg.payload)),
            )
            .await
            .map_err(DeviceError::transport)?;

        debug!(topic = %topic, "Subscribed to job notifications");
        Ok(())
    }

    /// Ask for the full execution of one job
    pub async fn handle(&self, job_id: &str) -> DeviceResult<()> {
        let request = DescribeJobExecutionRequest::new();
        self.transport
            .publish(
                &self.topics.job_detail(job_id),
                serde_json::to_vec(&request)?,
                QoS::AtMostOnce,
            )
            .await
            .map_err(DeviceError::transport)?;

        debug!(job_id, client_token = %request.client_token, "Requested job execution");
        Ok(())
    }

    /// Request every id, logging failures without dropping the rest
    async fn handle_each(&self, ids: Vec<String>) {
        for job_id in ids {
            if let Err(e) = self.handle(&job_id).await {
                warn!(job_id = %job_id, error = %e, "Could not request job execution");
            }
        }
    }

    pub async fn on_job_list(&self, payload: &[u8]) -> DeviceResult<()> {
        let list: JobListResponse = serde_json::from_slice(payload)?;
        let ids: Vec<String> = list.job_ids().map(str::to_string).collect();
        info!(count = ids.len(), "Received outstanding jobs");

        self.handle_each(ids).await;
        Ok(())
    }

    pub async fn on_notification(&self, payload: &[u8]) -> DeviceResult<()> {
        let notification: JobNotification = serde_json::from_slice(payload)?;
        let ids: Vec<String> = notification.queued_job_ids().map(str::to_string).collect();
        if ids.is_empty() {
            debug!("Notification carries no queued jobs");
        }

        self.handle_each(ids).await;
        Ok(())
    }

    /// Run a described execution and report its outcome
    pub async fn on_job_detail(&self, payload: &[u8]) -> DeviceResult<JobDirective> {
        let response: DescribeJobExecutionResponse = serde_json::from_slice(payload)?;
        let execution = response.execution;

        if let Some(status) = execution.status.filter(|s| s.is_terminal()) {
            info!(job_id = %execution.job_id, %status, "Job already finished, skipping");
            return Ok(JobDirective::Continue);
        }

        let span = crate::job_span!(
            job_id = %execution.job_id,
            operation = execution.operation().unwrap_or_default()
        );
        let job_id = execution.job_id.clone();
        let result = self.execute(execution).instrument(span).await;

        self.open_jobs.lock().await.remove(&job_id);
        result
    }

    async fn execute(&self, execution: JobExecution) -> DeviceResult<JobDirective> {
        let job_id = execution.job_id.clone();
        let document = execution.job_document.clone();
        metrics().job_received();
        self.open_jobs.lock().await.insert(job_id.clone(), execution);

        if let Err(e) = self
            .publish_status(&job_id, &JobStatusUpdate::new(JobStatus::InProgress))
            .await
        {
            warn!(error = %e, "Could not acknowledge job, executing anyway");
        }

        let report = self.registry.execute(&document, &self.context).await;
        let (update, directive) = match report {
            ExecutionReport::Finished { operation, outcome } => match outcome {
                OperationOutcome::Completed => {
                    info!(%operation, "Job succeeded");
                    (JobStatusUpdate::new(JobStatus::Succeeded), JobDirective::Continue)
                }
                OperationOutcome::RebootRequested => {
                    info!(%operation, "Job succeeded, reboot pending");
                    (JobStatusUpdate::new(JobStatus::Succeeded), JobDirective::Reboot)
                }
                OperationOutcome::Shutdown(kind) => {
                    warn!(%operation, ?kind, "Device going down mid-job");
                    return Ok(JobDirective::Shutdown(kind));
                }
            },
            ExecutionReport::Failed { operation, error } => {
                let reason = sanitize_error_message(&error.to_string());
                warn!(%operation, %reason, "Job failed");
                (
                    JobStatusUpdate::new(JobStatus::Failed).with_reason(reason),
                    JobDirective::Continue,
                )
            }
            ExecutionReport::Rejected { reason } => {
                warn!(%reason, "Job rejected");
                (
                    JobStatusUpdate::new(JobStatus::Rejected).with_reason(reason),
                    JobDirective::Continue,
                )
            }
        };

        self.publish_terminal_status(&job_id, &update).await?;
        match update.status {
            JobStatus::Succeeded => metrics().job_succeeded(),
            JobStatus::Failed => metrics().job_failed(),
            _ => metrics().job_rejected(),
        }
        Ok(directive)
    }

    async fn publish_status(&self, job_id: &str, update: &JobStatusUpdate) -> DeviceResult<()> {
        self.transport
            .publish(
                &self.topics.job_status(job_id),
                serde_json::to_vec(update)?,
                QoS::AtMostOnce,
            )
            .await
            .map_err(DeviceError::transport)?;

        debug!(job_id, status = %update.status, client_token = %update.client_token, "Published job status");
        Ok(())
    }

    /// Publish a final status, retrying a bounded number of times
    async fn publish_terminal_status(
        &self,
        job_id: &str,
        update: &JobStatusUpdate,
    ) -> DeviceResult<()> {
        let attempts = self.retry.status_retry_attempts.max(1);
        let delay = Duration::from_millis(self.retry.status_retry_delay_ms);

        for attempt in 1..=attempts {
            match self.publish_status(job_id, update).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Terminal status publish failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Terminal status publish failed, giving up");
                }
            }
        }

        metrics().status_update_failed();
        Err(DeviceError::StatusUpdateFailed {
            job_id: job_id.to_string(),
            attempts,
        })
    }

    pub async fn open_job_count(&self) -> usize {
        self.open_jobs.lock().await.len()
    }

    pub async fn is_open(&self, job_id: &str) -> bool {
        self.open_jobs.lock().await.contains_key(job_id)
    }
}
