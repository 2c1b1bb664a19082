// src/runner/spec.rs
//! Spec acceptance
//!
//! Turns a snapshot's job list into the set of specs the runner should
//! converge to:
//!
//! 1. resolve every type name (an unknown name rejects the whole document)
//! 2. compile the argument tree and any filter (a failure rejects that spec)
//! 3. let the factory check literal arguments
//! 4. evaluate the filter once; a falsy result skips the spec on this agent
//! 5. merge entries with the same identity by summing their counts

use crate::jobs::{JobFactory, JobRegistry};
use crate::limiter::RateSpec;
use crate::source::document::{BackoffPolicy, ConfigSnapshot, GlobalConfig, JobSpec, SpecKey};
use crate::template::{CompiledParams, CompiledTemplate, EnvPolicy, EvalContext, TemplateData};
use crate::utils::errors::{EngineError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A spec that passed acceptance
#[derive(Clone)]
pub struct AcceptedSpec {
    pub key: SpecKey,

    pub job_type: String,

    /// Name or type, for logs
    pub label: String,

    /// Desired replicas, already merged across duplicate entries
    pub count: usize,

    pub params: Arc<CompiledParams>,

    pub factory: Arc<dyn JobFactory>,

    pub rate: Option<RateSpec>,

    /// Overrides the global policy when set
    pub backoff: Option<BackoffPolicy>,
}

impl fmt::Debug for AcceptedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptedSpec")
            .field("key", &self.key)
            .field("job_type", &self.job_type)
            .field("count", &self.count)
            .field("templates", &self.params.template_count())
            .field("rate", &self.rate)
            .finish()
    }
}

/// A spec left out of this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSpec {
    /// Position in the document
    pub index: usize,

    pub label: String,

    pub reason: String,
}

/// Result of accepting one snapshot
#[derive(Debug, Default)]
pub struct Acceptance {
    /// Accepted specs in first-occurrence order
    pub specs: Vec<AcceptedSpec>,

    pub rejected: Vec<RejectedSpec>,

    /// Specs whose filter evaluated falsy
    pub filtered: usize,
}

fn evaluate_filter(
    filter: &str,
    spec: &JobSpec,
    key: &SpecKey,
    global: &Arc<GlobalConfig>,
    env: &Arc<EnvPolicy>,
) -> std::result::Result<bool, String> {
    let template = CompiledTemplate::compile(filter).map_err(|e| format!("filter: {}", e))?;
    let mut ctx = EvalContext::new(
        TemplateData {
            global: global.clone(),
            job_type: spec.job_type.clone(),
            spec_id: key.to_string(),
            replica: 0,
        },
        env.clone(),
    );
    let value = template.evaluate(&mut ctx).map_err(|e| format!("filter: {}", e))?;
    Ok(value.is_truthy())
}

fn accept_one(
    spec: &JobSpec,
    factory: Arc<dyn JobFactory>,
    global: &Arc<GlobalConfig>,
    env: &Arc<EnvPolicy>,
) -> std::result::Result<Option<AcceptedSpec>, String> {
    let key = spec.identity();
    let args = spec.normalized_args();

    let params = CompiledParams::compile(&args).map_err(|e| EngineError::from(e).to_string())?;

    factory
        .validate(&args)
        .map_err(|e| format!("invalid arguments for '{}': {}", spec.job_type, e))?;

    if let Some(backoff) = &spec.backoff {
        backoff.validate()?;
    }

    if let Some(filter) = &spec.filter {
        if !evaluate_filter(filter, spec, &key, global, env)? {
            return Ok(None);
        }
    }

    Ok(Some(AcceptedSpec {
        key,
        job_type: spec.job_type.clone(),
        label: spec.label().to_string(),
        count: spec.replicas(),
        params: Arc::new(params),
        factory,
        rate: spec.rate.clone(),
        backoff: spec.backoff.clone(),
    }))
}

/// Accept a snapshot against `registry`.
///
/// Fails only for document-level problems; per-spec failures are listed in
/// [`Acceptance::rejected`].
pub fn accept(snapshot: &ConfigSnapshot, registry: &JobRegistry, env: &Arc<EnvPolicy>) -> Result<Acceptance> {
    let factories = snapshot
        .jobs
        .iter()
        .map(|spec| registry.resolve(&spec.job_type))
        .collect::<Result<Vec<_>>>()?;

    let mut acceptance = Acceptance::default();
    let mut positions: HashMap<SpecKey, usize> = HashMap::new();

    for (index, (spec, factory)) in snapshot.jobs.iter().zip(factories).enumerate() {
        match accept_one(spec, factory, &snapshot.global, env) {
            Ok(Some(accepted)) => match positions.get(&accepted.key) {
                Some(&pos) => {
                    debug!("Merging duplicate spec {} into earlier entry", accepted.key);
                    acceptance.specs[pos].count += accepted.count;
                }
                None => {
                    positions.insert(accepted.key.clone(), acceptance.specs.len());
                    acceptance.specs.push(accepted);
                }
            },
            Ok(None) => {
                debug!("Spec #{} ({}) filtered out on this agent", index, spec.label());
                acceptance.filtered += 1;
            }
            Err(reason) => {
                warn!(index, job_type = %spec.job_type, "Rejected job spec: {}", reason);
                acceptance.rejected.push(RejectedSpec {
                    index,
                    label: spec.label().to_string(),
                    reason,
                });
            }
        }
    }

    if snapshot.jobs.is_empty() {
        debug!("Snapshot from {} declares no jobs", snapshot.origin);
    }

    Ok(acceptance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Arc<EnvPolicy> {
        Arc::new(EnvPolicy::default())
    }

    #[test]
    fn test_unknown_type_rejects_document() {
        let snapshot = ConfigSnapshot::from_jobs(
            vec![JobSpec::new("echo"), JobSpec::new("udp_flood")],
            GlobalConfig::default(),
        );
        let err = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
    }

    #[test]
    fn test_compile_error_rejects_only_that_spec() {
        let snapshot = ConfigSnapshot::from_jobs(
            vec![
                JobSpec::new("echo").with_args(json!({"message": "{{ no_such_fn 1 }}"})),
                JobSpec::new("log").with_args(json!({"text": "ok"})),
            ],
            GlobalConfig::default(),
        );
        let acceptance = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap();
        assert_eq!(acceptance.specs.len(), 1);
        assert_eq!(acceptance.specs[0].job_type, "log");
        assert_eq!(acceptance.rejected.len(), 1);
        assert_eq!(acceptance.rejected[0].index, 0);
        assert!(acceptance.rejected[0].reason.contains("no_such_fn"));

    }

    #[test]
    fn test_overflowing_filter_rejects_spec() {
        let snapshot = ConfigSnapshot::from_jobs(
            vec![
                JobSpec::new("echo").with_filter("{{ mod -9223372036854775808 -1 }}"),
                JobSpec::new("log").with_args(json!({"text": "ok"})),
            ],
            GlobalConfig::default(),
        );
        let acceptance = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap();
        assert_eq!(acceptance.specs.len(), 1);
        assert_eq!(acceptance.rejected.len(), 1);
        assert!(acceptance.rejected[0].reason.contains("mod"));
    }

    #[test]
    fn test_factory_validation_rejects_spec() {
        let snapshot = ConfigSnapshot::from_jobs(vec![JobSpec::new("sleep")], GlobalConfig::default());
        let acceptance = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap();
        assert!(acceptance.specs.is_empty());
        assert!(acceptance.rejected[0].reason.contains("duration_ms"));
    }

    #[test]
    fn test_duplicates_merge_counts() {
        let snapshot = ConfigSnapshot::from_jobs(
            vec![
                JobSpec::new("echo").with_count(2),
                JobSpec::new("log"),
                JobSpec::new("echo").with_count(3),
            ],
            GlobalConfig::default(),
        );
        let acceptance = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap();
        assert_eq!(acceptance.specs.len(), 2);
        assert_eq!(acceptance.specs[0].job_type, "echo");
        assert_eq!(acceptance.specs[0].count, 5);
    }

    #[test]
    fn test_filter_skips_spec() {
        let global = GlobalConfig {
            client_id: "agent-2".to_string(),
            ..Default::default()
        };
        let snapshot = ConfigSnapshot::from_jobs(
            vec![
                JobSpec::new("echo").with_filter("{{ eq .client_id \"agent-1\" }}"),
                JobSpec::new("log").with_filter("{{ eq .client_id \"agent-2\" }}"),
            ],
            global,
        );
        let acceptance = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap();
        assert_eq!(acceptance.filtered, 1);
        assert_eq!(acceptance.specs.len(), 1);
        assert_eq!(acceptance.specs[0].job_type, "log");
    }

    #[test]
    fn test_invalid_backoff_rejects_spec() {
        let snapshot = ConfigSnapshot::from_jobs(
            vec![JobSpec::new("echo").with_backoff(BackoffPolicy {
                failure_threshold: 0,
                ..Default::default()
            })],
            GlobalConfig::default(),
        );
        let acceptance = accept(&snapshot, &JobRegistry::with_builtins(), &env()).unwrap();
        assert_eq!(acceptance.rejected.len(), 1);
    }
}
