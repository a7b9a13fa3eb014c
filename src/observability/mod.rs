//! Observability: structured logging and process-wide counters

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, DeviceMetrics, MetricsSnapshot};

pub use logging::{job_span, mqtt_span, session_span};
