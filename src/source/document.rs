// src/source/document.rs
//! Config document model
//!
//! ```yaml
//! global:
//!   client_id: agent-7
//!   targets: [a.example, b.example]
//!   backoff: { failure_threshold: 3, initial_ms: 1000, multiplier: 2.0, max_ms: 60000 }
//!   vars: { region: eu }
//! jobs:
//!   - type: echo
//!     count: 3
//!     rate: 10/s
//!     args:
//!       message: "hello {{ counter }}"
//! ```

use crate::limiter::RateSpec;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive-failure cooldown policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Consecutive recoverable failures before a cooldown
    pub failure_threshold: u32,

    /// First cooldown, in milliseconds
    pub initial_ms: u64,

    /// Growth factor between consecutive cooldowns
    pub multiplier: f64,

    /// Cooldown ceiling, in milliseconds
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            initial_ms: 1_000,
            multiplier: 2.0,
            max_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Cooldown for the `streak`-th consecutive cooldown (1-based)
    pub fn cooldown(&self, streak: u32) -> Duration {
        let exponent = streak.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_ms as f64 * factor).min(self.max_ms as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("backoff failure_threshold must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("backoff multiplier must be >= 1, got {}", self.multiplier));
        }
        if self.max_ms < self.initial_ms {
            return Err("backoff max_ms must not be below initial_ms".to_string());
        }
        Ok(())
    }
}

/// Process-wide parameters shared read-only by every instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub client_id: String,
    pub targets: Vec<String>,
    pub proxies: Vec<String>,
    pub backoff: BackoffPolicy,

    /// Free-form values readable as `.vars.<path>`
    pub vars: serde_json::Value,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            targets: Vec::new(),
            proxies: Vec::new(),
            backoff: BackoffPolicy::default(),
            vars: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl GlobalConfig {
    /// Overlay a document's global section on these defaults
    pub fn merged(&self, section: &GlobalSection) -> GlobalConfig {
        GlobalConfig {
            client_id: section
                .client_id
                .clone()
                .unwrap_or_else(|| self.client_id.clone()),
            targets: section.targets.clone().unwrap_or_else(|| self.targets.clone()),
            proxies: section.proxies.clone().unwrap_or_else(|| self.proxies.clone()),
            backoff: section.backoff.clone().unwrap_or_else(|| self.backoff.clone()),
            vars: section.vars.clone().unwrap_or_else(|| self.vars.clone()),
        }
    }
}

/// The `global` section as written in a document; absent fields fall back
/// to process defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSection {
    pub client_id: Option<String>,
    pub targets: Option<Vec<String>>,
    pub proxies: Option<Vec<String>>,
    pub backoff: Option<BackoffPolicy>,
    pub vars: Option<serde_json::Value>,
}

/// Stable identity of a job spec across reloads
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecKey(String);

impl SpecKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_count() -> u32 {
    1
}

/// One job entry of a config document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: String,

    /// Optional display name for logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Desired replicas; values below 1 are treated as 1
    #[serde(default = "default_count")]
    pub count: u32,

    /// Parameters, literal or template-valued, possibly nested
    #[serde(default, alias = "params")]
    pub args: serde_json::Value,

    #[serde(default, alias = "rate_limit", skip_serializing_if = "Option::is_none")]
    pub rate: Option<RateSpec>,

    /// Overrides the global backoff policy for this spec's instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffPolicy>,

    /// Template evaluated once at acceptance; falsy means skip on this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            name: None,
            count: 1,
            args: serde_json::Value::Object(serde_json::Map::new()),
            rate: None,
            backoff: None,
            filter: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_rate(mut self, rate: RateSpec) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn replicas(&self) -> usize {
        self.count.max(1) as usize
    }

    /// Parameters with `null` normalized to an empty mapping
    pub fn normalized_args(&self) -> serde_json::Value {
        match &self.args {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other.clone(),
        }
    }

    /// Identity hash over type, canonical args, rate, backoff and filter.
    /// The replica count is deliberately excluded so a count change scales
    /// the running group instead of replacing it.
    pub fn identity(&self) -> SpecKey {
        let identity = serde_json::json!({
            "type": self.job_type,
            "args": self.normalized_args(),
            "rate": self.rate,
            "backoff": self.backoff,
            "filter": self.filter,
        });

        let mut canonical = String::new();
        write_canonical(&identity, &mut canonical);

        let digest = Sha256::digest(canonical.as_bytes());
        SpecKey(hex::encode(&digest[..8]))
    }

    /// Label for logs: the name if set, otherwise the type
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.job_type)
    }
}

/// JSON with object keys sorted at every level
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// A whole config document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub jobs: Vec<JobSpec>,
    pub global: GlobalSection,
}

/// Document encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    /// By file extension, otherwise JSON then YAML
    #[default]
    Auto,
    Json,
    Yaml,
}

impl ConfigDocument {
    /// Parse raw bytes; `origin` is used for extension sniffing and errors
    pub fn parse(bytes: &[u8], format: ConfigFormat, origin: &str) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(EngineError::ConfigError(format!("{}: empty document", origin)));
        }

        let format = match format {
            ConfigFormat::Auto => sniff_format(origin),
            explicit => explicit,
        };

        let json = || {
            serde_json::from_slice::<ConfigDocument>(bytes)
                .map_err(|e| EngineError::ConfigError(format!("{}: invalid JSON: {}", origin, e)))
        };
        let yaml = || {
            serde_yaml::from_slice::<ConfigDocument>(bytes)
                .map_err(|e| EngineError::ConfigError(format!("{}: invalid YAML: {}", origin, e)))
        };

        match format {
            ConfigFormat::Json => json(),
            ConfigFormat::Yaml => yaml(),
            ConfigFormat::Auto => json().or_else(|_| yaml()),
        }
    }
}

fn sniff_format(origin: &str) -> ConfigFormat {
    let lower = origin
        .split(['?', '#'])
        .next()
        .unwrap_or(origin)
        .to_ascii_lowercase();
    if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        ConfigFormat::Yaml
    } else if lower.ends_with(".json") {
        ConfigFormat::Json
    } else {
        ConfigFormat::Auto
    }
}

/// One accepted, parsed configuration
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Job specs in document order
    pub jobs: Vec<JobSpec>,

    /// Resolved global config, replaced wholesale on reload
    pub global: Arc<GlobalConfig>,

    /// Location the bytes came from
    pub origin: String,

    pub fetched_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn new(document: ConfigDocument, defaults: &GlobalConfig, origin: impl Into<String>) -> Self {
        Self {
            global: Arc::new(defaults.merged(&document.global)),
            jobs: document.jobs,
            origin: origin.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Snapshot built directly from specs, mostly for tests and embedding
    pub fn from_jobs(jobs: Vec<JobSpec>, global: GlobalConfig) -> Self {
        Self {
            jobs,
            global: Arc::new(global),
            origin: "inline".to_string(),
            fetched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const YAML_DOC: &str = r#"
global:
  client_id: agent-7
  targets: [a.example]
jobs:
  - type: echo
    count: 3
    rate: 10/s
    args:
      message: "hello {{ counter }}"
  - type: log
    params:
      text: static
"#;

    #[test]
    fn test_parse_yaml_document() {
        let doc = ConfigDocument::parse(YAML_DOC.as_bytes(), ConfigFormat::Auto, "jobs.yaml").unwrap();
        assert_eq!(doc.jobs.len(), 2);
        assert_eq!(doc.jobs[0].count, 3);
        assert_eq!(doc.jobs[0].rate.as_ref().unwrap().per_second, 10.0);
        assert_eq!(doc.jobs[1].count, 1);
        assert_eq!(doc.jobs[1].args, json!({"text": "static"}));
        assert_eq!(doc.global.client_id.as_deref(), Some("agent-7"));
    }

    #[test]
    fn test_parse_json_document_without_extension() {
        let raw = br#"{"jobs":[{"type":"sleep","args":{"duration_ms":5}}]}"#;
        let doc = ConfigDocument::parse(raw, ConfigFormat::Auto, "https://cfg.example/latest").unwrap();
        assert_eq!(doc.jobs[0].job_type, "sleep");
    }

    #[test]
    fn test_malformed_documents_are_config_errors() {
        for raw in ["", "   ", "jobs: [", "{\"jobs\": [{\"count\": 1}]}"] {
            let err = ConfigDocument::parse(raw.as_bytes(), ConfigFormat::Auto, "x").unwrap_err();
            assert!(matches!(err, EngineError::ConfigError(_)), "{:?}", raw);
        }
        let rate = r#"{"jobs":[{"type":"echo","rate":"fast"}]}"#;
        assert!(ConfigDocument::parse(rate.as_bytes(), ConfigFormat::Json, "x").is_err());
    }

    #[test]
    fn test_identity_ignores_key_order_and_count() {
        let a = JobSpec::new("echo").with_args(json!({"a": 1, "b": {"x": 1, "y": 2}}));
        let b = JobSpec::new("echo")
            .with_args(json!({"b": {"y": 2, "x": 1}, "a": 1}))
            .with_count(5);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().as_str().len(), 16);
    }

    #[test]
    fn test_identity_tracks_content() {
        let base = JobSpec::new("echo").with_args(json!({"a": 1}));
        let other_args = JobSpec::new("echo").with_args(json!({"a": 2}));
        let other_type = JobSpec::new("log").with_args(json!({"a": 1}));
        let other_rate = base.clone().with_rate(RateSpec::parse("1/s").unwrap());
        assert_ne!(base.identity(), other_args.identity());
        assert_ne!(base.identity(), other_type.identity());
        assert_ne!(base.identity(), other_rate.identity());

        let null_args = JobSpec::new("echo").with_args(serde_json::Value::Null);
        assert_eq!(null_args.identity(), JobSpec::new("echo").identity());
    }

    #[test]
    fn test_count_normalization() {
        assert_eq!(JobSpec::new("echo").with_count(0).replicas(), 1);
        assert_eq!(JobSpec::new("echo").with_count(4).replicas(), 4);
    }

    #[test]
    fn test_global_merge() {
        let defaults = GlobalConfig {
            client_id: "from-settings".to_string(),
            proxies: vec!["socks5://p".to_string()],
            ..Default::default()
        };
        let section = GlobalSection {
            client_id: Some("from-doc".to_string()),
            ..Default::default()
        };
        let merged = defaults.merged(&section);
        assert_eq!(merged.client_id, "from-doc");
        assert_eq!(merged.proxies, vec!["socks5://p".to_string()]);
    }

    #[test]
    fn test_backoff_curve() {
        let policy = BackoffPolicy {
            failure_threshold: 2,
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 350,
        };
        assert_eq!(policy.cooldown(1), Duration::from_millis(100));
        assert_eq!(policy.cooldown(2), Duration::from_millis(200));
        assert_eq!(policy.cooldown(3), Duration::from_millis(350));
        assert_eq!(policy.cooldown(500), Duration::from_millis(350));
        assert!(policy.validate().is_ok());
        assert!(BackoffPolicy { failure_threshold: 0, ..policy.clone() }.validate().is_err());
        assert!(BackoffPolicy { multiplier: 0.5, ..policy }.validate().is_err());
    }
}
