//! Shadow and jobs documents exchanged with the device management service
//!
//! Field names follow the service's camelCase wire format. Inbound documents
//! ignore fields the device does not use.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a fresh client token for a request
pub fn new_client_token() -> String {
    Uuid::new_v4().to_string()
}

/// Shadow state update document
///
/// # Examples
/// ```
/// use fleet_device_agent::protocol::ShadowUpdateRequest;
/// use serde_json::json;
///
/// let request = ShadowUpdateRequest::new(json!({"battery": 90}), true);
/// let wire = serde_json::to_value(&request).unwrap();
/// assert_eq!(wire["state"]["reported"]["battery"], 90);
/// assert!(wire["state"]["desired"].is_null());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShadowUpdateRequest {
    pub state: ShadowUpdateState,
    pub client_token: String,
}

/// `state` section of an outbound shadow update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowUpdateState {
    pub reported: Value,
    /// `Some(Value::Null)` clears the desired section server side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
}

impl ShadowUpdateRequest {
    pub fn new(reported: Value, clear_desired: bool) -> Self {
        Self {
            state: ShadowUpdateState {
                reported,
                desired: clear_desired.then_some(Value::Null),
            },
            client_token: new_client_token(),
        }
    }
}

/// Accepted reply to a shadow update
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShadowUpdateAccepted {
    #[serde(default)]
    pub state: AcceptedState,
    pub version: Option<u64>,
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AcceptedState {
    pub desired: Option<Value>,
    pub reported: Option<Value>,
}

impl ShadowUpdateAccepted {
    /// The desired delta when the document carries a non-empty one
    pub fn desired_delta(&self) -> Option<&Map<String, Value>> {
        self.state
            .desired
            .as_ref()
            .and_then(Value::as_object)
            .filter(|delta| !delta.is_empty())
    }
}

/// Request for the pending job executions of a thing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobListRequest {
    pub client_token: String,
}

impl JobListRequest {
    pub fn new() -> Self {
        Self {
            client_token: new_client_token(),
        }
    }
}

impl Default for JobListRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one job execution in a list or notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionSummary {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_number: Option<u64>,
}

/// Reply to a [`JobListRequest`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    #[serde(default)]
    pub queued_jobs: Vec<JobExecutionSummary>,
    #[serde(default)]
    pub in_progress_jobs: Vec<JobExecutionSummary>,
}

impl JobListResponse {
    /// Queued job ids first, then in-progress ones
    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.queued_jobs
            .iter()
            .chain(self.in_progress_jobs.iter())
            .map(|job| job.job_id.as_str())
    }
}

/// Request for the full execution of one job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobExecutionRequest {
    pub client_token: String,
    pub include_job_document: bool,
}

impl DescribeJobExecutionRequest {
    pub fn new() -> Self {
        Self {
            client_token: new_client_token(),
            include_job_document: true,
        }
    }
}

impl Default for DescribeJobExecutionRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply to a [`DescribeJobExecutionRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobExecutionResponse {
    pub execution: JobExecution,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub job_id: String,
    #[serde(default)]
    pub job_document: Value,
    pub status: Option<JobStatus>,
}

impl JobExecution {
    /// The `operation` field of the job document, if it is a string
    pub fn operation(&self) -> Option<&str> {
        self.job_document.get("operation").and_then(Value::as_str)
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Rejected,
    TimedOut,
    Removed,
    Canceled,
}

impl JobStatus {
    /// Whether the service treats the execution as finished
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Rejected => "REJECTED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Removed => "REMOVED",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<HashMap<String, String>>,
    pub client_token: String,
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            status_details: None,
            client_token: new_client_token(),
        }
    }

    /// Attach a `reason` status detail
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.status_details
            .get_or_insert_with(HashMap::new)
            .insert("reason".to_string(), reason.into());
        self
    }
}

/// Pending-jobs notification pushed by the service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobNotification {
    #[serde(default)]
    pub jobs: HashMap<String, Vec<JobExecutionSummary>>,
}

impl JobNotification {
    /// Ids of the jobs listed under `QUEUED`
    pub fn queued_job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs
            .get(JobStatus::Queued.as_str())
            .into_iter()
            .flatten()
            .map(|job| job.job_id.as_str())
    }
}
