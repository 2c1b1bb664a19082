// src/runner/mod.rs
//! Reconciling job runner
//!
//! The runner owns the authoritative map from spec identity to a group of
//! running instances and converges it with every accepted snapshot.
//!
//! # Architecture
//!
//! ```text
//! snapshot ──> accept (resolve, compile, filter, merge)
//!                 │
//!                 v
//! Runner.groups: SpecKey -> JobGroup { spec, instances[0..count] }
//!   - identity gone        -> cancel + bounded join, group removed
//!   - count lowered        -> highest replicas stopped
//!   - count raised         -> missing replicas launched
//!   - new identity         -> `count` replicas launched
//!   - stopped or errored   -> cleared, replica relaunched
//!   - unchanged            -> untouched
//! ```
//!
//! Passes are serialized by `&mut self`; a pass finishes stopping before it
//! starts anything. The current [`GlobalConfig`] is published through a
//! `watch` channel that every instance reads once per iteration.

pub mod gate;
pub mod instance;
pub mod spec;

pub use gate::{AlwaysEligible, EligibilityGate, StaticGate};
pub use instance::{InstanceState, InstanceStatus, StatusSnapshot};
pub use spec::{AcceptedSpec, RejectedSpec};

use crate::jobs::JobRegistry;
use crate::limiter::RateLimiter;
use crate::observability::metrics::{record_reconcile, set_active_instances};
use crate::source::document::{ConfigSnapshot, GlobalConfig, SpecKey};
use crate::template::EnvPolicy;
use crate::utils::config::RunnerSettings;
use crate::utils::errors::{EngineError, Result};
use futures::{Stream, StreamExt};
use instance::{InstanceConfig, InstanceHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Instances launched
    pub started: usize,

    /// Instances stopped
    pub stopped: usize,

    /// Instances left running untouched
    pub unchanged: usize,

    /// Stopped or errored instances cleared so their replica is relaunched
    pub replaced: usize,

    /// Specs that failed acceptance, with the reason
    pub rejected: Vec<RejectedSpec>,

    /// Specs skipped by their filter
    pub filtered: usize,

    /// Instances aborted after missing the grace deadline
    pub timed_out: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started == 0 && self.stopped == 0
    }
}

/// Running instances of one spec identity
struct JobGroup {
    spec: AcceptedSpec,

    /// Set when the spec asks for one bucket across all its replicas
    shared_limiter: Option<RateLimiter>,

    /// Ordered by replica index
    instances: Vec<InstanceHandle>,
}

impl JobGroup {
    fn new(spec: AcceptedSpec) -> Self {
        let shared_limiter = spec
            .rate
            .as_ref()
            .filter(|rate| rate.shared)
            .map(RateLimiter::new);
        Self {
            spec,
            shared_limiter,
            instances: Vec::new(),
        }
    }

    fn limiter(&self) -> RateLimiter {
        match &self.shared_limiter {
            Some(shared) => shared.clone(),
            None => RateLimiter::from_spec(self.spec.rate.as_ref()),
        }
    }

    /// Instances that have not reached a terminal state
    fn active(&self) -> usize {
        self.instances.iter().filter(|h| !h.is_terminal()).count()
    }

    /// Detach stopped and errored instances
    fn take_terminal(&mut self) -> Vec<InstanceHandle> {
        let (finished, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.instances)
            .into_iter()
            .partition(InstanceHandle::is_terminal);
        self.instances = live;
        finished
    }

    /// Detach replicas with an index at or above `count`
    fn take_excess(&mut self, count: usize) -> Vec<InstanceHandle> {
        let (excess, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.instances)
            .into_iter()
            .partition(|h| h.replica >= count);
        self.instances = keep;
        excess
    }

    /// Launch every missing replica index below `spec.count`; returns how many
    fn scale_up(
        &mut self,
        global: &watch::Sender<Arc<GlobalConfig>>,
        parent: &CancellationToken,
        env: &Arc<EnvPolicy>,
    ) -> usize {
        let mut launched = 0;
        for replica in 0..self.spec.count {
            if self.instances.iter().any(|h| h.replica == replica) {
                continue;
            }
            let config = InstanceConfig {
                key: self.spec.key.clone(),
                replica,
                job_type: self.spec.job_type.clone(),
                params: self.spec.params.clone(),
                factory: self.spec.factory.clone(),
                limiter: self.limiter(),
                backoff: self.spec.backoff.clone(),
                env: env.clone(),
            };
            self.instances.push(instance::spawn(config, global.subscribe(), parent));
            launched += 1;
        }
        self.instances.sort_by_key(|h| h.replica);
        launched
    }
}

/// Reconciling scheduler
pub struct Runner {
    registry: JobRegistry,

    settings: RunnerSettings,

    env: Arc<EnvPolicy>,

    global_tx: watch::Sender<Arc<GlobalConfig>>,

    groups: HashMap<SpecKey, JobGroup>,

    /// Process-wide scope; every instance runs under a child of it
    cancel: CancellationToken,

    gate: Arc<dyn EligibilityGate>,
}

impl Runner {
    pub fn new(registry: JobRegistry, settings: RunnerSettings, env: EnvPolicy, cancel: CancellationToken) -> Self {
        let (global_tx, _) = watch::channel(Arc::new(GlobalConfig::default()));
        Self {
            registry,
            settings,
            env: Arc::new(env),
            global_tx,
            groups: HashMap::new(),
            cancel,
            gate: Arc::new(AlwaysEligible),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn EligibilityGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Latest published global config
    pub fn global(&self) -> Arc<GlobalConfig> {
        self.global_tx.borrow().clone()
    }

    /// Instances not yet stopped or errored, across all groups
    pub fn running_count(&self) -> usize {
        self.groups.values().map(JobGroup::active).sum()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Status of every tracked instance, terminal ones included, ordered by id
    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        let mut statuses: Vec<StatusSnapshot> = self
            .groups
            .values()
            .flat_map(|g| g.instances.iter().map(InstanceHandle::snapshot))
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Converge the running set with `snapshot`.
    ///
    /// A document-level error (unknown job type) leaves everything as it
    /// was and is returned; per-spec problems are listed in the report.
    pub async fn apply(&mut self, snapshot: ConfigSnapshot) -> Result<ReconcileReport> {
        let pass_started = Instant::now();
        let acceptance = spec::accept(&snapshot, &self.registry, &self.env)?;

        self.global_tx.send_replace(snapshot.global.clone());

        let mut report = ReconcileReport {
            rejected: acceptance.rejected,
            filtered: acceptance.filtered,
            ..Default::default()
        };

        let desired: HashMap<SpecKey, usize> = acceptance
            .specs
            .iter()
            .map(|spec| (spec.key.clone(), spec.count))
            .collect();

        // Stop first: vanished identities, then excess replicas
        let mut stopping = Vec::new();

        let removed: Vec<SpecKey> = self
            .groups
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            if let Some(group) = self.groups.remove(&key) {
                info!(spec_id = %key, job_type = %group.spec.job_type, "Stopping {} instances of removed spec {}", group.instances.len(), group.spec.label);
                stopping.extend(group.instances);
            }
        }

        let mut finished = Vec::new();
        for (key, group) in self.groups.iter_mut() {
            let Some(&count) = desired.get(key) else {
                continue;
            };
            let excess = group.take_excess(count);
            if !excess.is_empty() {
                debug!(spec_id = %key, "Scaling {} down to {}, stopping {}", group.spec.label, count, excess.len());
                stopping.extend(excess);
            }
            let terminal = group.take_terminal();
            if !terminal.is_empty() {
                info!(spec_id = %key, "Relaunching {} stopped or errored instances of {}", terminal.len(), group.spec.label);
                finished.extend(terminal);
            }
            report.unchanged += group.instances.len();
            group.spec.count = count;
        }

        report.stopped = stopping.len();
        report.replaced = finished.len();
        stopping.extend(finished);
        if !stopping.is_empty() {
            report.timed_out = instance::stop_all(stopping, self.settings.grace_period()).await;
            if !report.timed_out.is_empty() {
                warn!(
                    "{}",
                    EngineError::ShutdownTimeout {
                        instances: report.timed_out.clone(),
                    }
                );
            }
        }

        // Then start: new identities and scale-ups, in document order
        for spec in acceptance.specs {
            let group = self.groups.entry(spec.key.clone()).or_insert_with(|| {
                info!(spec_id = %spec.key, job_type = %spec.job_type, "Launching {} instances of {}", spec.count, spec.label);
                JobGroup::new(spec)
            });
            report.started += group.scale_up(&self.global_tx, &self.cancel, &self.env);
        }

        let running = self.running_count();
        set_active_instances(running);
        record_reconcile(report.started, report.stopped, pass_started.elapsed());

        info!(
            "Reconciled config from {}: {} started, {} stopped, {} replaced, {} unchanged, {} rejected, {} running",
            snapshot.origin,
            report.started,
            report.stopped,
            report.replaced,
            report.unchanged,
            report.rejected.len(),
            running
        );

        Ok(report)
    }

    /// Apply every snapshot from `snapshots` until the process-wide token
    /// fires, then stop everything.
    ///
    /// The eligibility gate is consulted once, before the first snapshot.
    pub async fn run<S>(&mut self, snapshots: S) -> Result<()>
    where
        S: Stream<Item = ConfigSnapshot> + Send,
    {
        if !self.gate.is_eligible().await {
            warn!("Agent is not eligible to run jobs");
            return Ok(());
        }

        let cancel = self.cancel.clone();
        tokio::pin!(snapshots);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = snapshots.next() => next,
            };

            match next {
                Some(snapshot) => {
                    let origin = snapshot.origin.clone();
                    if let Err(e) = self.apply(snapshot).await {
                        warn!("Rejected config from {}, keeping current jobs: {}", origin, e);
                    }
                }
                None => {
                    debug!("Config stream ended, waiting for shutdown");
                    cancel.cancelled().await;
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Stop every instance, bounded by the shutdown timeout
    pub async fn shutdown(&mut self) -> Result<()> {
        let handles: Vec<InstanceHandle> = self
            .groups
            .drain()
            .flat_map(|(_, group)| group.instances)
            .collect();

        info!("Stopping {} instances", handles.len());
        let timed_out = instance::stop_all(handles, self.settings.shutdown_timeout()).await;
        set_active_instances(0);

        if timed_out.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ShutdownTimeout { instances: timed_out })
        }
    }

    #[cfg(test)]
    fn status_handles(&self) -> Vec<Arc<InstanceStatus>> {
        self.groups
            .values()
            .flat_map(|g| g.instances.iter().map(|h| h.status().clone()))
            .collect()
    }
}
