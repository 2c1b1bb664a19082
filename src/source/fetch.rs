// src/source/fetch.rs
//! Config fetching
//!
//! # Architecture
//!
//! ```text
//!   locations (file | http(s))  --first success-->  raw bytes
//!         | all failed, nothing accepted yet              |
//!         v                                               v
//!   backup document  ------------------------------>  parse --> ConfigSnapshot
//!                                                        |
//!                           same bytes as last time -> skipped
//! ```
//!
//! Fetch and parse failures are logged and counted; the last accepted
//! snapshot keeps being served because the stream simply emits nothing.
//! A document naming a job type the agent cannot run is rejected here
//! too, so it never counts as accepted and the backup stays reachable.

use crate::observability::metrics::{record_config_fetch, FetchOutcome};
use crate::source::document::{ConfigDocument, ConfigFormat, ConfigSnapshot, GlobalConfig};
use crate::utils::config::SourceSettings;
use crate::utils::errors::{EngineError, Result};
use futures::Stream;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One place a config document may be read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    File(PathBuf),
    Remote(String),
}

impl ConfigLocation {
    /// `http://` and `https://` are remote, anything else is a path
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ConfigLocation::Remote(trimmed.to_string())
        } else {
            ConfigLocation::File(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLocation::File(path) => write!(f, "{}", path.display()),
            ConfigLocation::Remote(url) => f.write_str(url),
        }
    }
}

/// Fallback document
#[derive(Debug, Clone)]
pub enum BackupDocument {
    Inline(String),
    File(PathBuf),
}

/// Raw bytes and where they came from
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub bytes: Vec<u8>,
    pub origin: String,
}

/// Produces config snapshots from an ordered list of locations
pub struct ConfigSource {
    locations: Vec<ConfigLocation>,

    backup: Option<BackupDocument>,

    format: ConfigFormat,

    refresh_interval: Duration,

    fetch_timeout: Duration,

    /// Process defaults the document's `global` section is merged onto
    defaults: GlobalConfig,

    client: reqwest::Client,

    /// Job types the runner can launch; empty accepts any
    known_types: BTreeSet<String>,

    /// Bytes of the last accepted document
    last_accepted: Option<Vec<u8>>,
}

impl ConfigSource {
    pub fn new(locations: Vec<ConfigLocation>) -> Self {
        let settings = SourceSettings::default();
        Self {
            locations,
            backup: None,
            format: settings.format,
            refresh_interval: settings.refresh_interval(),
            fetch_timeout: settings.fetch_timeout(),
            defaults: GlobalConfig::default(),
            client: reqwest::Client::new(),
            known_types: BTreeSet::new(),
            last_accepted: None,
        }
    }

    /// Build from process settings
    pub fn from_settings(settings: &SourceSettings, defaults: GlobalConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("jobmesh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::ConfigError(format!("http client: {}", e)))?;

        let backup = match (&settings.backup_inline, &settings.backup_path) {
            (Some(text), _) => Some(BackupDocument::Inline(text.clone())),
            (None, Some(path)) => Some(BackupDocument::File(path.clone())),
            (None, None) => None,
        };

        Ok(Self {
            locations: settings.paths.iter().map(|p| ConfigLocation::parse(p)).collect(),
            backup,
            format: settings.format,
            refresh_interval: settings.refresh_interval(),
            fetch_timeout: settings.fetch_timeout(),
            defaults,
            client,
            known_types: BTreeSet::new(),
            last_accepted: None,
        })
    }

    pub fn with_backup(mut self, backup: BackupDocument) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_format(mut self, format: ConfigFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_defaults(mut self, defaults: GlobalConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Reject documents naming any type outside `types`
    pub fn with_known_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.known_types = types.into_iter().collect();
        self
    }

    async fn read_location(&self, location: &ConfigLocation) -> Result<Vec<u8>> {
        let failed = |reason: String| EngineError::FetchFailed {
            location: location.to_string(),
            reason,
        };

        match location {
            ConfigLocation::File(path) => tokio::fs::read(path).await.map_err(|e| failed(e.to_string())),
            ConfigLocation::Remote(url) => {
                let response = self
                    .client
                    .get(url)
                    .timeout(self.fetch_timeout)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| failed(e.to_string()))?;
                let body = response.bytes().await.map_err(|e| failed(e.to_string()))?;
                Ok(body.to_vec())
            }
        }
    }

    /// Try every location in order; the first that yields bytes wins
    pub async fn fetch_raw(&self) -> Result<RawConfig> {
        let mut last_error = None;

        for location in &self.locations {
            match self.read_location(location).await {
                Ok(bytes) => {
                    debug!("Fetched {} bytes from {}", bytes.len(), location);
                    return Ok(RawConfig {
                        bytes,
                        origin: location.to_string(),
                    });
                }
                Err(e) => {
                    warn!(location = %location, error = %e, "Config location unavailable");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::FetchFailed {
            location: "<none>".to_string(),
            reason: "no config locations configured".to_string(),
        }))
    }

    async fn read_backup(&self) -> Option<RawConfig> {
        match self.backup.as_ref()? {
            BackupDocument::Inline(text) => Some(RawConfig {
                bytes: text.as_bytes().to_vec(),
                origin: "backup:inline".to_string(),
            }),
            BackupDocument::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Some(RawConfig {
                    bytes,
                    origin: format!("backup:{}", path.display()),
                }),
                Err(e) => {
                    warn!("Backup config {} unreadable: {}", path.display(), e);
                    None
                }
            },
        }
    }

    fn parse_raw(&self, raw: &RawConfig) -> Result<ConfigSnapshot> {
        let document = ConfigDocument::parse(&raw.bytes, self.format, &raw.origin)?;
        if !self.known_types.is_empty() {
            let unknown: BTreeSet<&str> = document
                .jobs
                .iter()
                .map(|job| job.job_type.as_str())
                .filter(|name| !self.known_types.contains(*name))
                .collect();
            if !unknown.is_empty() {
                return Err(EngineError::ConfigError(format!(
                    "unknown job types: {}",
                    unknown.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }
        }
        Ok(ConfigSnapshot::new(document, &self.defaults, raw.origin.clone()))
    }

    /// Accept `raw` unless it repeats the last document or fails to parse
    fn accept(&mut self, raw: RawConfig, outcome: FetchOutcome) -> Option<ConfigSnapshot> {
        if self.last_accepted.as_deref() == Some(raw.bytes.as_slice()) {
            debug!("Config from {} unchanged", raw.origin);
            record_config_fetch(FetchOutcome::Unchanged);
            return None;
        }

        match self.parse_raw(&raw) {
            Ok(snapshot) => {
                info!(
                    "Accepted config from {} ({} job specs)",
                    raw.origin,
                    snapshot.jobs.len()
                );
                record_config_fetch(outcome);
                self.last_accepted = Some(raw.bytes);
                Some(snapshot)
            }
            Err(e) => {
                warn!(origin = %raw.origin, error = %e, "Rejected config document");
                record_config_fetch(FetchOutcome::Invalid);
                None
            }
        }
    }

    /// Run one fetch cycle.
    ///
    /// Returns a snapshot only when a new, valid document was accepted.
    pub async fn poll(&mut self) -> Option<ConfigSnapshot> {
        let fetched = self.fetch_raw().await;
        let never_accepted = self.last_accepted.is_none();

        match fetched {
            Ok(raw) => {
                let snapshot = self.accept(raw, FetchOutcome::Updated);
                if snapshot.is_none() && self.last_accepted.is_none() {
                    return self.poll_backup().await;
                }
                snapshot
            }
            Err(e) => {
                record_config_fetch(FetchOutcome::Failed);
                if never_accepted {
                    warn!("No config location reachable ({}), trying backup", e);
                    self.poll_backup().await
                } else {
                    warn!("Config fetch failed, keeping last accepted config: {}", e);
                    None
                }
            }
        }
    }

    async fn poll_backup(&mut self) -> Option<ConfigSnapshot> {
        let raw = self.read_backup().await?;
        self.accept(raw, FetchOutcome::Backup)
    }

    /// Turn the source into a lazy, infinite stream of snapshots.
    ///
    /// The first fetch happens immediately, later ones every refresh
    /// interval. The stream ends when `cancel` fires.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = ConfigSnapshot> {
        futures::stream::unfold((self, cancel, true), |(mut source, cancel, first)| async move {
            let mut wait_first = !first;
            loop {
                if wait_first {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(source.refresh_interval) => {}
                    }
                }
                wait_first = true;

                let polled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    polled = source.poll() => polled,
                };

                if let Some(snapshot) = polled {
                    return Some((snapshot, (source, cancel, false)));
                }
            }
        })
    }
}
