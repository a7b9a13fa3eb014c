//! Error types for the fleet device agent
//!
//! `DeviceError` is the crate-wide error. Adapter and handler failures have their
//! own enums ([`crate::transport::mqtt::MqttError`], [`OperationError`]) and are
//! folded into `DeviceError` at the component boundary.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Could not connect after {attempts} attempts")]
    ConnectRetriesExhausted { attempts: u32 },

    #[error("Terminal status for job {job_id} not published after {attempts} attempts")]
    StatusUpdateFailed { job_id: String, attempts: u32 },

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),
}

impl DeviceError {
    /// Wrap any transport error
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }

    /// Create invalid message error
    pub fn invalid_message<S: Into<String>>(message: S) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }
}

/// Failure raised by an operation handler. Maps to a `FAILED` job status.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Shadow update failed: {0}")]
    Shadow(String),
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config|certs?)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_REASON_LEN: usize = 500;

/// Redact secrets and credential paths from a message and cap it at 500 bytes
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_REASON_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_REASON_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
