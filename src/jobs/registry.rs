// src/jobs/registry.rs
//! Job type registry

use crate::jobs::{builtin, Job, JobContext, JobError, JobFactory};
use crate::utils::errors::{EngineError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Adapter turning a closure into a factory
struct FnFactory<F>(F);

impl<F> JobFactory for FnFactory<F>
where
    F: Fn(JobContext) -> std::result::Result<Box<dyn Job>, JobError> + Send + Sync,
{
    fn create(&self, ctx: JobContext) -> std::result::Result<Box<dyn Job>, JobError> {
        (self.0)(ctx)
    }
}

/// Job type name → factory
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: HashMap<String, Arc<dyn JobFactory>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl JobRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `echo`, `log` and `sleep`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn JobFactory>) {
        let name = name.into();
        debug!("Registered job type {}", name);
        self.factories.insert(name, factory);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(JobContext) -> std::result::Result<Box<dyn Job>, JobError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnFactory(constructor)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobFactory>> {
        self.factories.get(name).cloned()
    }

    /// Like [`get`](Self::get) but unknown names are a config error
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobFactory>> {
        self.get(name).ok_or_else(|| {
            EngineError::ConfigError(format!(
                "unknown job type '{}' (known: {})",
                name,
                self.type_names().join(", ")
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
