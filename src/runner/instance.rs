// src/runner/instance.rs
//! One running replica of a job spec
//!
//! # Lifecycle
//!
//! ```text
//! Starting ──> Running ⇄ Cooldown
//!                 │          │
//!                 │ fatal    │ cancel
//!                 v          v
//!              Errored    Stopping ──> Stopped
//! ```
//!
//! Each iteration: acquire a token, evaluate the argument templates,
//! execute the job once, record the outcome. Instances never restart
//! themselves; a stopped or errored instance is replaced only by the runner.
//! A panic inside a job ends the instance as `Errored`.

use crate::jobs::{JobContext, JobError, JobFactory};
use crate::limiter::RateLimiter;
use crate::observability::metrics::{record_iteration, record_iteration_error, ErrorKind};
use crate::source::document::{BackoffPolicy, GlobalConfig, SpecKey};
use crate::template::{CompiledParams, EnvPolicy, EvalContext, TemplateData};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Cooldown,
    Stopping,
    Stopped,
    Errored,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Errored)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Cooldown => "cooldown",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateRecord {
    state: InstanceState,
    last_error: Option<String>,
}

/// Live status shared between an instance task and the runner
#[derive(Debug)]
pub struct InstanceStatus {
    record: Mutex<StateRecord>,
    iterations: AtomicU64,
    requests: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self {
            record: Mutex::new(StateRecord {
                state: InstanceState::Starting,
                last_error: None,
            }),
            iterations: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl InstanceStatus {
    pub fn state(&self) -> InstanceState {
        self.record.lock().state
    }

    /// Move to `state`; terminal states are final
    pub fn transition(&self, state: InstanceState) -> bool {
        let mut record = self.record.lock();
        if record.state.is_terminal() {
            return false;
        }
        record.state = state;
        true
    }

    fn record_success(&self, requests: u64, bytes: u64) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.requests.fetch_add(requests, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_error(&self, message: String) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.record.lock().last_error = Some(message);
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, id: &str) -> StatusSnapshot {
        let record = self.record.lock();
        StatusSnapshot {
            id: id.to_string(),
            state: record.state,
            last_error: record.last_error.clone(),
            iterations: self.iterations.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of an instance's status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub id: String,
    pub state: InstanceState,
    pub last_error: Option<String>,
    pub iterations: u64,
    pub requests: u64,
    pub bytes: u64,
    pub errors: u64,
}

/// Everything needed to start one replica
#[derive(Clone)]
pub struct InstanceConfig {
    pub key: SpecKey,
    pub replica: usize,
    pub job_type: String,
    pub params: Arc<CompiledParams>,
    pub factory: Arc<dyn JobFactory>,
    pub limiter: RateLimiter,

    /// Spec override; the current global policy applies otherwise
    pub backoff: Option<BackoffPolicy>,

    pub env: Arc<EnvPolicy>,
}

pub fn instance_id(key: &SpecKey, replica: usize) -> String {
    format!("{}#{}", key, replica)
}

/// Runner-side handle to a spawned instance
pub struct InstanceHandle {
    pub id: String,
    pub replica: usize,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    status: Arc<InstanceStatus>,
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .field("state", &self.status.state())
            .finish()
    }
}

impl InstanceHandle {
    pub fn status(&self) -> &Arc<InstanceStatus> {
        &self.status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot(&self.id)
    }

    /// Ask the instance to stop; returns immediately
    pub fn stop(&self) {
        self.status.transition(InstanceState::Stopping);
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Whether the instance reached `Stopped` or `Errored`
    pub fn is_terminal(&self) -> bool {
        self.status.state().is_terminal()
    }
}

/// Spawn one instance under `parent`'s cancellation scope
pub fn spawn(
    config: InstanceConfig,
    global: watch::Receiver<Arc<GlobalConfig>>,
    parent: &CancellationToken,
) -> InstanceHandle {
    let cancel = parent.child_token();
    let status = Arc::new(InstanceStatus::default());
    let id = instance_id(&config.key, config.replica);
    let replica = config.replica;

    let task = tokio::spawn(supervise(config, global, cancel.clone(), status.clone()));

    InstanceHandle {
        id,
        replica,
        cancel,
        task,
        status,
    }
}

/// Stop every handle and wait for them up to `grace`.
///
/// Instances still running at the deadline are aborted and marked
/// `Stopped`; their ids are returned.
pub async fn stop_all(handles: Vec<InstanceHandle>, grace: Duration) -> Vec<String> {
    for handle in &handles {
        handle.stop();
    }

    let deadline = Instant::now() + grace;
    let mut timed_out = Vec::new();

    for mut handle in handles {
        match tokio::time::timeout_at(deadline, &mut handle.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => {
                warn!("Instance {} task panicked: {}", handle.id, e);
                handle.status.record_error(e.to_string());
                handle.status.transition(InstanceState::Errored);
            }
            Ok(Err(e)) => {
                warn!("Instance {} task failed: {}", handle.id, e);
                handle.status.transition(InstanceState::Stopped);
            }
            Err(_) => {
                handle.task.abort();
                handle.status.transition(InstanceState::Stopped);
                timed_out.push(handle.id.clone());
            }
        }
    }

    timed_out
}

/// Consecutive-failure bookkeeping for one instance
#[derive(Debug, Default)]
struct FailureStreak {
    consecutive: u32,
    cooldowns: u32,
}

impl FailureStreak {
    fn success(&mut self) {
        self.consecutive = 0;
        self.cooldowns = 0;
    }

    /// Record a failure; returns the cooldown to serve, if any
    fn failure(&mut self, policy: &BackoffPolicy) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive < policy.failure_threshold.max(1) {
            return None;
        }
        self.consecutive = 0;
        self.cooldowns = self.cooldowns.saturating_add(1);
        Some(policy.cooldown(self.cooldowns))
    }
}

/// Run the instance loop, turning a panic into an `Errored` instance
async fn supervise(
    config: InstanceConfig,
    global_rx: watch::Receiver<Arc<GlobalConfig>>,
    cancel: CancellationToken,
    status: Arc<InstanceStatus>,
) {
    let id = instance_id(&config.key, config.replica);
    let job_type = config.job_type.clone();

    let outcome = AssertUnwindSafe(run_instance(config, global_rx, cancel, status.clone()))
        .catch_unwind()
        .await;

    if let Err(payload) = outcome {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(instance = %id, job_type = %job_type, "Instance panicked: {}", message);
        status.record_error(format!("panicked: {}", message));
        status.transition(InstanceState::Errored);
        record_iteration_error(&job_type, ErrorKind::Fatal);
    }
}

async fn run_instance(
    config: InstanceConfig,
    global_rx: watch::Receiver<Arc<GlobalConfig>>,
    cancel: CancellationToken,
    status: Arc<InstanceStatus>,
) {
    let id = instance_id(&config.key, config.replica);
    let job_type = config.job_type.as_str();

    let ctx = JobContext {
        job_type: config.job_type.clone(),
        spec_id: config.key.clone(),
        replica: config.replica,
        limiter: config.limiter.clone(),
        cancel: cancel.clone(),
    };

    let mut job = match config.factory.create(ctx) {
        Ok(job) => job,
        Err(e) => {
            error!(instance = %id, job_type, error = %e, "Job construction failed");
            status.record_error(e.to_string());
            status.transition(InstanceState::Errored);
            record_iteration_error(job_type, ErrorKind::Fatal);
            return;
        }
    };

    let mut eval = EvalContext::new(
        TemplateData {
            global: global_rx.borrow().clone(),
            job_type: config.job_type.clone(),
            spec_id: config.key.to_string(),
            replica: config.replica,
        },
        config.env.clone(),
    );

    status.transition(InstanceState::Running);
    debug!("Instance {} running", id);

    let mut streak = FailureStreak::default();

    loop {
        if config.limiter.is_unlimited() {
            tokio::task::yield_now().await;
        }
        if config.limiter.acquire(&cancel).await.is_err() {
            break;
        }

        let global = global_rx.borrow().clone();
        eval.set_global(global.clone());

        let failure = match config.params.evaluate(&mut eval) {
            Ok(args) => {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = job.execute(&args, &global) => outcome,
                };

                match outcome {
                    Ok(report) => {
                        status.record_success(report.requests, report.bytes);
                        record_iteration(job_type, report.requests, report.bytes);
                        streak.success();
                        None
                    }
                    Err(JobError::Recoverable(reason)) => {
                        record_iteration_error(job_type, ErrorKind::Recoverable);
                        Some(reason)
                    }
                    Err(JobError::Fatal(reason)) => {
                        error!(instance = %id, job_type, error = %reason, "Instance failed permanently");
                        status.record_error(reason);
                        status.transition(InstanceState::Errored);
                        record_iteration_error(job_type, ErrorKind::Fatal);
                        return;
                    }
                }
            }
            Err(e) => {
                record_iteration_error(job_type, ErrorKind::Eval);
                Some(e.to_string())
            }
        };

        let Some(reason) = failure else {
            continue;
        };

        debug!(instance = %id, error = %reason, "Iteration failed");
        status.record_error(reason);

        let policy = config.backoff.as_ref().unwrap_or(&global.backoff);
        if let Some(cooldown) = streak.failure(policy) {
            warn!(
                instance = %id,
                "Cooling down for {:?} after {} consecutive failures",
                cooldown,
                policy.failure_threshold
            );
            status.transition(InstanceState::Cooldown);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cooldown) => {}
            }
            status.transition(InstanceState::Running);
        }
    }

    status.transition(InstanceState::Stopping);
    status.transition(InstanceState::Stopped);
    info!("Instance {} stopped", id);
}
