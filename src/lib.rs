// src/lib.rs
//! Jobmesh Engine Library
//!
//! A long-running agent core that keeps a set of concurrently running jobs
//! in line with a declarative, remotely refreshable document, and evaluates
//! job parameters through a sandboxed template language.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **source**: job document model, spec identity, file/remote fetching
//! - **template**: restricted expression language over a fixed builtin table
//! - **limiter**: token-bucket rate limiting, per instance or per spec
//! - **jobs**: the job type contract, registry and built-in demo types
//! - **runner**: reconciliation, instance lifecycle, bounded shutdown
//! - **observability**: tracing and metrics setup, metric recorders
//! - **utils**: process settings and the crate error type

// Public module exports
pub mod jobs;
pub mod limiter;
pub mod observability;
pub mod runner;
pub mod source;
pub mod template;
pub mod utils;

// Re-export commonly used types
pub use jobs::{IterationReport, Job, JobContext, JobError, JobFactory, JobRegistry};
pub use limiter::{RateLimiter, RateSpec};
pub use runner::{ReconcileReport, Runner};
pub use source::{ConfigSnapshot, ConfigSource, GlobalConfig, JobSpec};
pub use template::{compile, CompiledTemplate, EvalContext};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
