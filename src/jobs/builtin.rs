// src/jobs/builtin.rs
//! Built-in demonstration job types
//!
//! - **echo**: renders `message` and logs it at debug level
//! - **log**: logs `text` at `level` (`debug`, `info`, `warn`, `error`)
//! - **sleep**: waits `duration_ms`, returning early when cancelled
//!
//! An argument that evaluates to a structurally invalid value is a fatal
//! failure: retrying the same templates cannot fix it.
//!
//! None of them touch the network or the file system; they exist to drive
//! the runner end to end and as a template for real job types.

use crate::jobs::{is_templated, IterationReport, Job, JobContext, JobError, JobFactory};
use crate::jobs::registry::JobRegistry;
use crate::source::document::GlobalConfig;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub fn register_all(registry: &mut JobRegistry) {
    registry.register("echo", Arc::new(EchoFactory));
    registry.register("log", Arc::new(LogFactory));
    registry.register("sleep", Arc::new(SleepFactory));
}

fn render(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

// echo

pub struct EchoFactory;

impl JobFactory for EchoFactory {
    fn create(&self, ctx: JobContext) -> Result<Box<dyn Job>, JobError> {
        Ok(Box::new(EchoJob { ctx }))
    }
}

pub struct EchoJob {
    ctx: JobContext,
}

#[async_trait]
impl Job for EchoJob {
    async fn execute(&mut self, args: &Json, _global: &GlobalConfig) -> Result<IterationReport, JobError> {
        let message = render(args.get("message").unwrap_or(&Json::Null));
        debug!(
            spec_id = %self.ctx.spec_id,
            replica = self.ctx.replica,
            "echo: {}",
            message
        );
        Ok(IterationReport::new(1, message.len() as u64))
    }
}

// log

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(value: Option<&Json>) -> Result<Self, String> {
        match value {
            None | Some(Json::Null) => Ok(LogLevel::Info),
            Some(Json::String(s)) => match s.to_ascii_lowercase().as_str() {
                "debug" => Ok(LogLevel::Debug),
                "info" => Ok(LogLevel::Info),
                "warn" | "warning" => Ok(LogLevel::Warn),
                "error" => Ok(LogLevel::Error),
                other => Err(format!("unknown log level '{}'", other)),
            },
            Some(other) => Err(format!("log level must be a string, got {}", other)),
        }
    }
}

pub struct LogFactory;

impl JobFactory for LogFactory {
    fn validate(&self, args: &Json) -> Result<(), String> {
        match args.get("level") {
            Some(level) if is_templated(level) => Ok(()),
            level => LogLevel::parse(level).map(|_| ()),
        }
    }

    fn create(&self, ctx: JobContext) -> Result<Box<dyn Job>, JobError> {
        Ok(Box::new(LogJob { ctx }))
    }
}

pub struct LogJob {
    ctx: JobContext,
}

#[async_trait]
impl Job for LogJob {
    async fn execute(&mut self, args: &Json, global: &GlobalConfig) -> Result<IterationReport, JobError> {
        let level = LogLevel::parse(args.get("level")).map_err(JobError::Fatal)?;
        let text = render(args.get("text").unwrap_or(&Json::Null));
        let spec_id = &self.ctx.spec_id;
        let client_id = global.client_id.as_str();

        match level {
            LogLevel::Debug => debug!(%spec_id, client_id, "{}", text),
            LogLevel::Info => info!(%spec_id, client_id, "{}", text),
            LogLevel::Warn => warn!(%spec_id, client_id, "{}", text),
            LogLevel::Error => error!(%spec_id, client_id, "{}", text),
        }

        Ok(IterationReport::new(1, text.len() as u64))
    }
}

// sleep

fn duration_arg(args: &Json) -> Result<Duration, String> {
    match args.get("duration_ms") {
        Some(Json::Number(n)) => n
            .as_u64()
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration_ms must be a non-negative integer, got {}", n)),
        Some(other) => Err(format!("duration_ms must be a number, got {}", other)),
        None => Err("missing duration_ms".to_string()),
    }
}

pub struct SleepFactory;

impl JobFactory for SleepFactory {
    fn validate(&self, args: &Json) -> Result<(), String> {
        match args.get("duration_ms") {
            Some(value) if is_templated(value) => Ok(()),
            _ => duration_arg(args).map(|_| ()),
        }
    }

    fn create(&self, ctx: JobContext) -> Result<Box<dyn Job>, JobError> {
        Ok(Box::new(SleepJob { cancel: ctx.cancel }))
    }
}

pub struct SleepJob {
    cancel: CancellationToken,
}

#[async_trait]
impl Job for SleepJob {
    async fn execute(&mut self, args: &Json, _global: &GlobalConfig) -> Result<IterationReport, JobError> {
        let duration = duration_arg(args).map_err(JobError::Fatal)?;

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }

        Ok(IterationReport::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::RateLimiter;
    use crate::source::document::JobSpec;
    use serde_json::json;

    fn context() -> JobContext {
        JobContext {
            job_type: "test".to_string(),
            spec_id: JobSpec::new("test").identity(),
            replica: 0,
            limiter: RateLimiter::unlimited(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_echo_reports_message_size() {
        let mut job = EchoFactory.create(context()).unwrap();
        let report = job
            .execute(&json!({"message": "hello"}), &GlobalConfig::default())
            .await
            .unwrap();
        assert_eq!(report, IterationReport::new(1, 5));
    }

    #[test]
    fn test_log_validation() {
        assert!(LogFactory.validate(&json!({"text": "x"})).is_ok());
        assert!(LogFactory.validate(&json!({"level": "warn"})).is_ok());
        assert!(LogFactory.validate(&json!({"level": "{{ random_choice (list \"info\" \"warn\") }}"})).is_ok());
        assert!(LogFactory.validate(&json!({"level": "loud"})).is_err());
    }

    #[tokio::test]
    async fn test_log_bad_level_is_fatal() {
        let mut job = LogFactory.create(context()).unwrap();
        let err = job
            .execute(&json!({"level": "loud"}), &GlobalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_sleep_bad_duration_is_fatal() {
        let mut job = SleepFactory.create(context()).unwrap();
        let err = job
            .execute(&json!({"duration_ms": -5}), &GlobalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Fatal(_)));
    }

    #[test]
    fn test_sleep_validation() {
        assert!(SleepFactory.validate(&json!({"duration_ms": 10})).is_ok());
        assert!(SleepFactory.validate(&json!({"duration_ms": "{{ random_int 1 5 }}"})).is_ok());
        assert!(SleepFactory.validate(&json!({})).is_err());
        assert!(SleepFactory.validate(&json!({"duration_ms": -1})).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_returns_early_on_cancel() {
        let ctx = context();
        let cancel = ctx.cancel.clone();
        let mut job = SleepFactory.create(ctx).unwrap();

        let start = tokio::time::Instant::now();
        cancel.cancel();
        job.execute(&json!({"duration_ms": 60_000}), &GlobalConfig::default())
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
