// src/runner/gate.rs
//! Startup eligibility gate

use async_trait::async_trait;

/// Decides once, before any job starts, whether this agent may run jobs.
///
/// An ineligible agent returns from [`Runner::run`](crate::runner::Runner::run)
/// without starting anything.
#[async_trait]
pub trait EligibilityGate: Send + Sync {
    async fn is_eligible(&self) -> bool;
}

/// Gate that always allows
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEligible;

#[async_trait]
impl EligibilityGate for AlwaysEligible {
    async fn is_eligible(&self) -> bool {
        true
    }
}

/// Gate driven by a fixed answer, for embedding and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

#[async_trait]
impl EligibilityGate for StaticGate {
    async fn is_eligible(&self) -> bool {
        self.0
    }
}
