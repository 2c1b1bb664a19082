// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - **init_tracing**: `tracing-subscriber` registry with an `EnvFilter`
//!   (settings default, `RUST_LOG` override) and a human or JSON formatter
//! - **init_metrics**: optional Prometheus scrape endpoint behind the
//!   `metrics` facade
//! - **metrics**: the recorders the runner and config source call

pub mod metrics;

use crate::utils::config::ObservabilitySettings;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter: `RUST_LOG` when set, otherwise the configured level
fn build_env_filter(default_level: &str) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(default_level),
    }
    .map_err(|e| EngineError::ConfigError(format!("invalid log filter: {}", e)))
}

/// Install the global tracing subscriber
pub fn init_tracing(settings: &ObservabilitySettings) -> Result<()> {
    let filter = build_env_filter(&settings.log_level)?;

    let layer = if settings.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| EngineError::ConfigError(format!("tracing already initialized: {}", e)))?;

    Ok(())
}

/// Install the Prometheus exporter when a listen address is configured.
///
/// Without one, metric calls go to the facade's no-op recorder.
pub fn init_metrics(settings: &ObservabilitySettings) -> Result<()> {
    let Some(addr) = settings.metrics_listen else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ConfigError(format!("metrics exporter on {}: {}", addr, e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}
