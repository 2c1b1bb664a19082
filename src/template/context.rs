// src/template/context.rs
//! Per-instance evaluation state
//!
//! Each job instance owns one [`EvalContext`]. Random draws and counters
//! live here and nowhere else, so two instances never observe each
//! other's state.

use crate::source::document::GlobalConfig;
use crate::template::error::EvalError;
use crate::template::value::Value;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Distinct counter names one context may hold
pub const MAX_COUNTERS: usize = 256;

/// Longest accepted counter name, in bytes
pub const MAX_COUNTER_NAME_LEN: usize = 128;

/// Environment variables templates may read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvPolicy {
    /// A variable is readable when its name starts with one of these
    pub allowed_prefixes: Vec<String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec!["JOBMESH_TPL_".to_string()],
        }
    }
}

impl EnvPolicy {
    /// Policy that exposes no variables
    pub fn deny_all() -> Self {
        Self {
            allowed_prefixes: Vec::new(),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        !name.is_empty()
            && self
                .allowed_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }
}

/// Read-only values reachable through `.field` references
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    pub global: Arc<GlobalConfig>,
    pub job_type: String,
    pub spec_id: String,
    pub replica: usize,
}

/// Mutable evaluation state owned by one job instance
pub struct EvalContext {
    rng: StdRng,
    counters: HashMap<String, u64>,
    data: TemplateData,
    env: Arc<EnvPolicy>,
}

impl EvalContext {
    /// Create a context with an entropy-seeded generator
    pub fn new(data: TemplateData, env: Arc<EnvPolicy>) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            counters: HashMap::new(),
            data,
            env,
        }
    }

    /// Deterministic context with default data, for tests and benches
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            counters: HashMap::new(),
            data: TemplateData::default(),
            env: Arc::new(EnvPolicy::default()),
        }
    }

    /// Swap in the latest global snapshot
    pub fn set_global(&mut self, global: Arc<GlobalConfig>) {
        self.data.global = global;
    }

    pub fn data(&self) -> &TemplateData {
        &self.data
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Next value of a named counter; the first call yields 1
    pub(crate) fn next_counter(&mut self, name: &str) -> Result<u64, EvalError> {
        if let Some(slot) = self.counters.get_mut(name) {
            *slot = slot.saturating_add(1);
            return Ok(*slot);
        }
        if name.len() > MAX_COUNTER_NAME_LEN {
            return Err(EvalError::OutOfRange {
                func: "counter",
                reason: format!("name longer than {} bytes", MAX_COUNTER_NAME_LEN),
            });
        }
        if self.counters.len() >= MAX_COUNTERS {
            return Err(EvalError::OutOfRange {
                func: "counter",
                reason: format!("more than {} distinct counters", MAX_COUNTERS),
            });
        }
        self.counters.insert(name.to_string(), 1);
        Ok(1)
    }

    pub(crate) fn read_env(&self, name: &str) -> Result<String, EvalError> {
        if !self.env.allows(name) {
            return Err(EvalError::EnvNotAllowed(name.to_string()));
        }
        Ok(std::env::var(name).unwrap_or_default())
    }

    /// Resolve a `.a.b` path
    pub(crate) fn field(&self, path: &[String]) -> Result<Value, EvalError> {
        let missing = || EvalError::MissingField(path.join("."));
        let (head, rest) = path.split_first().ok_or_else(missing)?;
        let global = &self.data.global;

        let scalar = |value: Value| if rest.is_empty() { Ok(value) } else { Err(missing()) };

        match head.as_str() {
            "client_id" => scalar(Value::Str(global.client_id.clone())),
            "targets" => scalar(Value::List(
                global.targets.iter().map(|t| Value::from(t.as_str())).collect(),
            )),
            "proxies" => scalar(Value::List(
                global.proxies.iter().map(|p| Value::from(p.as_str())).collect(),
            )),
            "job" => scalar(Value::Str(self.data.job_type.clone())),
            "spec_id" => scalar(Value::Str(self.data.spec_id.clone())),
            "replica" => scalar(Value::Int(self.data.replica as i64)),
            "vars" => {
                let mut cursor = &global.vars;
                for segment in rest {
                    cursor = cursor.get(segment.as_str()).ok_or_else(missing)?;
                }
                Ok(Value::from_json(cursor))
            }
            _ => Err(missing()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(str::to_string).collect()
    }

    fn context_with_global() -> EvalContext {
        let global = GlobalConfig {
            client_id: "client-1".to_string(),
            targets: vec!["a.example".to_string(), "b.example".to_string()],
            vars: serde_json::json!({"region": {"name": "eu"}}),
            ..Default::default()
        };
        EvalContext::new(
            TemplateData {
                global: Arc::new(global),
                job_type: "echo".to_string(),
                spec_id: "abc".to_string(),
                replica: 2,
            },
            Arc::new(EnvPolicy::default()),
        )
    }

    #[test]
    fn test_field_lookup() {
        let ctx = context_with_global();
        assert_eq!(ctx.field(&path("client_id")).unwrap(), Value::from("client-1"));
        assert_eq!(ctx.field(&path("replica")).unwrap(), Value::Int(2));
        assert_eq!(ctx.field(&path("vars.region.name")).unwrap(), Value::from("eu"));
        assert!(matches!(ctx.field(&path("targets")).unwrap(), Value::List(t) if t.len() == 2));
        assert!(ctx.field(&path("vars.region.missing")).is_err());
        assert!(ctx.field(&path("client_id.more")).is_err());
        assert!(ctx.field(&path("password")).is_err());
    }

    #[test]
    fn test_counters_are_independent_by_name() {
        let mut ctx = EvalContext::with_seed(1);
        assert_eq!(ctx.next_counter("a").unwrap(), 1);
        assert_eq!(ctx.next_counter("a").unwrap(), 2);
        assert_eq!(ctx.next_counter("b").unwrap(), 1);
    }

    #[test]
    fn test_counter_names_are_bounded() {
        let mut ctx = EvalContext::with_seed(1);
        for i in 0..MAX_COUNTERS {
            assert_eq!(ctx.next_counter(&format!("c{}", i)).unwrap(), 1);
        }
        assert!(matches!(
            ctx.next_counter("one_too_many").unwrap_err(),
            EvalError::OutOfRange { func: "counter", .. }
        ));
        // Existing counters keep counting
        assert_eq!(ctx.next_counter("c0").unwrap(), 2);

        let mut fresh = EvalContext::with_seed(1);
        assert!(fresh.next_counter(&"n".repeat(MAX_COUNTER_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_env_policy() {
        let policy = EnvPolicy::default();
        assert!(policy.allows("JOBMESH_TPL_REGION"));
        assert!(!policy.allows("HOME"));
        assert!(!EnvPolicy::deny_all().allows("JOBMESH_TPL_REGION"));

        let ctx = EvalContext::with_seed(1);
        assert_eq!(
            ctx.read_env("PATH").unwrap_err(),
            EvalError::EnvNotAllowed("PATH".to_string())
        );
        assert_eq!(ctx.read_env("JOBMESH_TPL_SURELY_UNSET_9f2").unwrap(), "");
    }
}
