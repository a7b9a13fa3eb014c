//! Process-wide device counters
//!
//! Plain atomics behind a global instance. Counters only grow; tests that share
//! the process compare deltas.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Lazy<DeviceMetrics> = Lazy::new(DeviceMetrics::new);

/// Get reference to global metrics
pub fn metrics() -> &'static DeviceMetrics {
    &METRICS
}

/// Counters for one device process
#[derive(Debug)]
pub struct DeviceMetrics {
    started_at: DateTime<Utc>,

    heartbeats_sent: AtomicU64,
    heartbeats_failed: AtomicU64,

    shadow_reports: AtomicU64,
    shadow_report_failures: AtomicU64,
    desired_merges: AtomicU64,

    jobs_received: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_rejected: AtomicU64,
    status_update_failures: AtomicU64,

    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    reboots: AtomicU64,
}

impl DeviceMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            heartbeats_sent: AtomicU64::new(0),
            heartbeats_failed: AtomicU64::new(0),
            shadow_reports: AtomicU64::new(0),
            shadow_report_failures: AtomicU64::new(0),
            desired_merges: AtomicU64::new(0),
            jobs_received: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            status_update_failures: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            reboots: AtomicU64::new(0),
        }
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_failed(&self) {
        self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shadow_reported(&self) {
        self.shadow_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shadow_report_failed(&self) {
        self.shadow_report_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn desired_merged(&self) {
        self.desired_merges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_received(&self) {
        self.jobs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_update_failed(&self) {
        self.status_update_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_attempted(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rebooted(&self) {
        self.reboots.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let now = Utc::now();

        MetricsSnapshot {
            heartbeat: HeartbeatMetrics {
                sent: load(&self.heartbeats_sent),
                failed: load(&self.heartbeats_failed),
            },
            shadow: ShadowMetrics {
                reports: load(&self.shadow_reports),
                report_failures: load(&self.shadow_report_failures),
                desired_merges: load(&self.desired_merges),
            },
            jobs: JobMetrics {
                received: load(&self.jobs_received),
                succeeded: load(&self.jobs_succeeded),
                failed: load(&self.jobs_failed),
                rejected: load(&self.jobs_rejected),
                status_update_failures: load(&self.status_update_failures),
            },
            connection: ConnectionMetrics {
                attempts: load(&self.connect_attempts),
                failures: load(&self.connect_failures),
                reboots: load(&self.reboots),
            },
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            timestamp: now,
        }
    }
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub heartbeat: HeartbeatMetrics,
    pub shadow: ShadowMetrics,
    pub jobs: JobMetrics,
    pub connection: ConnectionMetrics,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatMetrics {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShadowMetrics {
    pub reports: u64,
    pub report_failures: u64,
    pub desired_merges: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobMetrics {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub status_update_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub attempts: u64,
    pub failures: u64,
    pub reboots: u64,
}
