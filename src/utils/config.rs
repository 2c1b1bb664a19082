// src/utils/config.rs
//! Process settings
//!
//! Layered, lowest precedence first:
//!
//! 1. Built-in defaults (`impl Default` below)
//! 2. `jobmesh.{toml,yaml,json}` in the working directory, or the file
//!    named by `JOBMESH_CONFIG`
//! 3. Environment variables such as `JOBMESH__RUNNER__GRACE_PERIOD_SECS=5`
//!
//! These settings describe the agent itself. The job document the agent
//! runs is fetched separately, see [`crate::source`].

use crate::source::document::{ConfigFormat, GlobalConfig};
use crate::template::EnvPolicy;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "JOBMESH_CONFIG";

const ENV_PREFIX: &str = "JOBMESH";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub source: SourceSettings,
    pub runner: RunnerSettings,

    /// Defaults for the document's `global` section
    pub global: GlobalConfig,

    /// Environment variables templates may read
    pub template: EnvPolicy,

    pub observability: ObservabilitySettings,
}

/// Where the job document comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// File paths or `http(s)://` URLs, tried in order
    pub paths: Vec<String>,

    /// Backup document file, used when nothing was ever fetched
    pub backup_path: Option<PathBuf>,

    /// Inline backup document; takes precedence over `backup_path`
    pub backup_inline: Option<String>,

    pub format: ConfigFormat,

    /// Seconds between fetches
    pub refresh_interval_secs: u64,

    /// Per-request timeout for remote locations
    pub fetch_timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            paths: vec!["jobs.yaml".to_string()],
            backup_path: None,
            backup_inline: None,
            format: ConfigFormat::Auto,
            refresh_interval_secs: 60,
            fetch_timeout_secs: 20,
        }
    }
}

impl SourceSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Time a stopping instance gets before it is aborted
    pub grace_period_secs: u64,

    /// Bound on the final teardown of every instance
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
            shutdown_timeout_secs: 30,
        }
    }
}

impl RunnerSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Default filter directive; `RUST_LOG` wins when set
    pub log_level: String,

    pub json_logs: bool,

    /// Prometheus scrape endpoint; no exporter when unset
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_listen: None,
        }
    }
}

impl EngineConfig {
    /// Load from the default file locations and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load with an explicit settings file; a missing default file is fine,
    /// a missing explicit one is an error
    pub fn load_from(file: Option<&std::path::Path>) -> Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("jobmesh").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("source.paths")
                    .with_list_parse_key("global.targets")
                    .with_list_parse_key("global.proxies")
                    .with_list_parse_key("template.allowed_prefixes"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.paths.is_empty()
            && self.source.backup_inline.is_none()
            && self.source.backup_path.is_none()
        {
            return Err(EngineError::ConfigError(
                "source.paths is empty and no backup document is configured".to_string(),
            ));
        }
        if self.source.refresh_interval_secs == 0 {
            return Err(EngineError::ConfigError(
                "source.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.source.fetch_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "source.fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.runner.grace_period_secs == 0 {
            return Err(EngineError::ConfigError(
                "runner.grace_period_secs must be positive".to_string(),
            ));
        }
        if self.runner.shutdown_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "runner.shutdown_timeout_secs must be positive".to_string(),
            ));
        }
        self.global
            .backoff
            .validate()
            .map_err(|e| EngineError::ConfigError(format!("global.backoff: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.grace_period(), Duration::from_secs(10));
        assert_eq!(config.template.allowed_prefixes, vec!["JOBMESH_TPL_".to_string()]);
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = EngineConfig::default();
        config.source.refresh_interval_secs = 0;
        assert!(matches!(config.validate(), Err(EngineError::ConfigError(_))));

        let mut config = EngineConfig::default();
        config.runner.grace_period_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.source.paths.clear();
        assert!(config.validate().is_err());
        config.source.backup_inline = Some("jobs: []".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "source:\n  paths: [\"a.yaml\", \"https://cfg.example/jobs.json\"]\n  refresh_interval_secs: 5\n\
             runner:\n  grace_period_secs: 3\nglobal:\n  client_id: agent-1\n  vars:\n    region: eu\n"
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.source.paths.len(), 2);
        assert_eq!(config.source.refresh_interval_secs, 5);
        assert_eq!(config.source.fetch_timeout_secs, 20);
        assert_eq!(config.runner.grace_period_secs, 3);
        assert_eq!(config.global.client_id, "agent-1");
        assert_eq!(config.global.vars["region"], serde_json::json!("eu"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            EngineConfig::load_from(Some(&missing)),
            Err(EngineError::Settings(_))
        ));
    }
}
