// src/observability/metrics.rs
//! Metric recorders
//!
//! Fire-and-forget calls into the `metrics` facade:
//! - iterations, requests and bytes per job type (counters)
//! - iteration errors by kind (counter)
//! - config fetch outcomes (counter)
//! - instances started/stopped by reconciliation (counters)
//! - active instances (gauge)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Why an iteration did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Template evaluation failed; the iteration was skipped
    Eval,
    Recoverable,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Eval => "eval",
            ErrorKind::Recoverable => "recoverable",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Result of one config fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New bytes parsed and emitted
    Updated,
    /// Bytes identical to the last accepted document
    Unchanged,
    /// Served from the backup document
    Backup,
    /// Every location failed
    Failed,
    /// Bytes fetched but the document did not parse
    Invalid,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Updated => "updated",
            FetchOutcome::Unchanged => "unchanged",
            FetchOutcome::Backup => "backup",
            FetchOutcome::Failed => "failed",
            FetchOutcome::Invalid => "invalid",
        }
    }
}

pub fn record_iteration(job_type: &str, requests: u64, bytes: u64) {
    let job_type = job_type.to_string();
    counter!("jobmesh_iterations_total", "job_type" => job_type.clone()).increment(1);
    if requests > 0 {
        counter!("jobmesh_requests_total", "job_type" => job_type.clone()).increment(requests);
    }
    if bytes > 0 {
        counter!("jobmesh_bytes_total", "job_type" => job_type).increment(bytes);
    }
}

pub fn record_iteration_error(job_type: &str, kind: ErrorKind) {
    counter!(
        "jobmesh_iteration_errors_total",
        "job_type" => job_type.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_config_fetch(outcome: FetchOutcome) {
    counter!("jobmesh_config_fetches_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record one reconciliation pass
pub fn record_reconcile(started: usize, stopped: usize, duration: Duration) {
    counter!("jobmesh_instances_started_total").increment(started as u64);
    counter!("jobmesh_instances_stopped_total").increment(stopped as u64);
    histogram!("jobmesh_reconcile_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_active_instances(count: usize) {
    gauge!("jobmesh_active_instances").set(count as f64);
}
