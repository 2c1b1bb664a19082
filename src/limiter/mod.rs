// src/limiter/mod.rs
//! Iteration rate limiting
//!
//! - **RateSpec**: declarative rate from the config document
//!   (`"10/s"`, `"600/m"`, `{rate: "5/s", burst: 10, shared: true}`)
//! - **TokenBucket**: continuous-refill bucket with cancellable acquire
//! - **RateLimiter**: cloneable handle given to each job instance; either
//!   unlimited, private to one instance, or shared by a whole spec

pub mod token_bucket;

pub use token_bucket::TokenBucket;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Acquire was interrupted by the instance's cancellation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter acquire cancelled")]
pub struct Cancelled;

/// Slowest accepted rate: one iteration per day
pub const MIN_PER_SECOND: f64 = 1.0 / 86_400.0;

/// Declarative rate policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RateSpecRepr")]
pub struct RateSpec {
    /// Sustained rate in iterations per second
    pub per_second: f64,

    /// Bucket capacity
    pub burst: u32,

    /// One bucket for every instance of the spec instead of one each
    pub shared: bool,
}

impl RateSpec {
    pub fn new(per_second: f64, burst: u32) -> Result<Self, String> {
        if !per_second.is_finite() || per_second < MIN_PER_SECOND {
            return Err(format!(
                "rate must be at least one per day, got {}/s",
                per_second
            ));
        }
        if burst == 0 {
            return Err("burst must be at least 1".to_string());
        }
        Ok(Self {
            per_second,
            burst,
            shared: false,
        })
    }

    /// Parse `"<n>/s"`, `"<n>/m"`, `"<n>/h"` or a bare per-second number
    pub fn parse(text: &str) -> Result<Self, String> {
        Self::new(parse_rate(text)?, 1)
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst.max(1);
        self
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s burst {}", self.per_second, self.burst)?;
        if self.shared {
            f.write_str(" shared")?;
        }
        Ok(())
    }
}

fn parse_rate(text: &str) -> Result<f64, String> {
    let text = text.trim();
    let (amount, unit) = match text.split_once('/') {
        Some((amount, unit)) => (amount.trim(), unit.trim()),
        None => (text, "s"),
    };

    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("invalid rate '{}'", text))?;

    let seconds = match unit {
        "s" | "sec" | "second" => 1.0,
        "m" | "min" | "minute" => 60.0,
        "h" | "hour" => 3600.0,
        other => return Err(format!("unknown rate unit '{}' in '{}'", other, text)),
    };

    let per_second = amount / seconds;
    if !per_second.is_finite() || per_second < MIN_PER_SECOND {
        return Err(format!("rate must be at least one per day, got '{}'", text));
    }
    Ok(per_second)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RateValue {
    Text(String),
    Number(f64),
}

impl RateValue {
    fn per_second(&self) -> Result<f64, String> {
        match self {
            RateValue::Text(text) => parse_rate(text),
            RateValue::Number(n) => parse_rate(&n.to_string()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RateSpecRepr {
    Short(RateValue),
    Full {
        rate: RateValue,
        #[serde(default)]
        burst: Option<u32>,
        #[serde(default)]
        shared: bool,
    },
}

impl TryFrom<RateSpecRepr> for RateSpec {
    type Error = String;

    fn try_from(repr: RateSpecRepr) -> Result<Self, Self::Error> {
        match repr {
            RateSpecRepr::Short(value) => RateSpec::new(value.per_second()?, 1),
            RateSpecRepr::Full { rate, burst, shared } => {
                Ok(RateSpec::new(rate.per_second()?, burst.unwrap_or(1))?.shared(shared))
            }
        }
    }
}

/// Rate limiter handle held by a job instance
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    bucket: Option<Arc<TokenBucket>>,
}

impl RateLimiter {
    /// Limiter that never waits
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// Fresh bucket for `spec`
    pub fn new(spec: &RateSpec) -> Self {
        Self {
            bucket: Some(Arc::new(TokenBucket::new(spec.burst, spec.per_second))),
        }
    }

    /// Limiter for an optional spec; `None` means unlimited
    pub fn from_spec(spec: Option<&RateSpec>) -> Self {
        spec.map(Self::new).unwrap_or_default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Whether two handles draw from the same bucket
    pub fn shares_bucket_with(&self, other: &RateLimiter) -> bool {
        match (&self.bucket, &other.bucket) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Wait for a token; cancellation wins over a rate-limit wait
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        match &self.bucket {
            Some(bucket) => bucket.acquire(cancel).await,
            None if cancel.is_cancelled() => Err(Cancelled),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(RateSpec::parse("10/s").unwrap().per_second, 10.0);
        assert_eq!(RateSpec::parse("120/m").unwrap().per_second, 2.0);
        assert_eq!(RateSpec::parse("1800 / h").unwrap().per_second, 0.5);
        assert_eq!(RateSpec::parse("4").unwrap().per_second, 4.0);
        assert!(RateSpec::parse("0/s").is_err());
        assert!(RateSpec::parse("ten/s").is_err());
        assert!(RateSpec::parse("5/d").is_err());
        assert!(RateSpec::parse("1e-20/s").is_err());
        assert!(RateSpec::parse("1/h").is_ok());
    }

    #[test]
    fn test_deserialize_forms() {
        let short: RateSpec = serde_json::from_str("\"10/s\"").unwrap();
        assert_eq!(short.per_second, 10.0);
        assert_eq!(short.burst, 1);
        assert!(!short.shared);

        let number: RateSpec = serde_json::from_str("2.5").unwrap();
        assert_eq!(number.per_second, 2.5);

        let full: RateSpec =
            serde_yaml::from_str("rate: 60/m\nburst: 5\nshared: true\n").unwrap();
        assert_eq!(full.per_second, 1.0);
        assert_eq!(full.burst, 5);
        assert!(full.shared);

        assert!(serde_json::from_str::<RateSpec>("\"-1/s\"").is_err());
        assert!(serde_json::from_str::<RateSpec>("{\"rate\": \"1/s\", \"burst\": 0}").is_err());
    }

    #[test]
    fn test_shared_handles() {
        let spec = RateSpec::parse("1/s").unwrap();
        let a = RateLimiter::new(&spec);
        let b = a.clone();
        let c = RateLimiter::new(&spec);
        assert!(a.shares_bucket_with(&b));
        assert!(!a.shares_bucket_with(&c));
        assert!(!RateLimiter::unlimited().shares_bucket_with(&a));
    }

    #[tokio::test]
    async fn test_unlimited_respects_cancellation() {
        let limiter = RateLimiter::unlimited();
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await.is_ok());
        cancel.cancel();
        assert_eq!(limiter.acquire(&cancel).await, Err(Cancelled));
    }
}
