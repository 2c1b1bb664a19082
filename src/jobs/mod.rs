// src/jobs/mod.rs
//! Pluggable job types
//!
//! A job type is a [`JobFactory`] registered under a name. For every running
//! replica the runner asks the factory for one [`Job`] and then calls
//! [`Job::execute`] once per iteration with freshly evaluated arguments.
//!
//! - **JobRegistry**: name → factory, resolved once when a spec is accepted
//! - **builtin**: `echo`, `log` and `sleep`, side-effect free demo types

pub mod builtin;
pub mod registry;

pub use registry::JobRegistry;

use crate::limiter::RateLimiter;
use crate::source::document::{GlobalConfig, SpecKey};
use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Outcome counters of one successful iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Operations issued during the iteration
    pub requests: u64,

    /// Payload bytes produced or transferred
    pub bytes: u64,
}

impl IterationReport {
    pub fn new(requests: u64, bytes: u64) -> Self {
        Self { requests, bytes }
    }
}

/// Failure of one iteration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Counts toward the instance's backoff; the loop keeps going
    #[error("iteration failed: {0}")]
    Recoverable(String),

    /// The instance stops permanently
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Everything a job needs for its whole lifetime
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_type: String,

    pub spec_id: SpecKey,

    pub replica: usize,

    /// Same limiter the instance loop acquires from before each iteration
    pub limiter: RateLimiter,

    /// Fires when the instance is asked to stop
    pub cancel: CancellationToken,
}

/// One running replica of a job type
#[async_trait]
pub trait Job: Send {
    /// Execute one iteration with this iteration's resolved arguments
    async fn execute(&mut self, args: &Json, global: &GlobalConfig) -> Result<IterationReport, JobError>;
}

/// Constructor for one job type
pub trait JobFactory: Send + Sync {
    /// Check the literal parts of a spec's arguments at acceptance.
    ///
    /// Template-valued arguments are only known per iteration and must be
    /// skipped here.
    fn validate(&self, _args: &Json) -> Result<(), String> {
        Ok(())
    }

    fn create(&self, ctx: JobContext) -> Result<Box<dyn Job>, JobError>;
}

/// True for string arguments that will be produced by a template
pub fn is_templated(value: &Json) -> bool {
    matches!(value, Json::String(s) if s.contains(crate::template::ACTION_OPEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_templated() {
        assert!(is_templated(&json!("{{ counter }}")));
        assert!(!is_templated(&json!("plain")));
        assert!(!is_templated(&json!(5)));
    }

    #[test]
    fn test_job_error_display() {
        assert_eq!(JobError::Recoverable("timeout".into()).to_string(), "iteration failed: timeout");
        assert_eq!(JobError::Fatal("bad args".into()).to_string(), "fatal: bad args");
    }
}
