// src/main.rs
//! Jobmesh agent
//!
//! Loads process settings, then keeps the configured job document running
//! until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use jobmesh_engine::jobs::JobRegistry;
use jobmesh_engine::observability::{init_metrics, init_tracing};
use jobmesh_engine::runner::Runner;
use jobmesh_engine::source::ConfigSource;
use jobmesh_engine::utils::config::EngineConfig;
use jobmesh_engine::{BuildInfo, EngineError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("loading settings")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    let build = BuildInfo::current();
    info!(
        "Starting jobmesh v{} ({}, built {} with {})",
        build.version, build.git_hash, build.build_timestamp, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let registry = JobRegistry::with_builtins();
    info!("Job types available: {}", registry.type_names().join(", "));
    let source = ConfigSource::from_settings(&config.source, config.global.clone())?
        .with_known_types(registry.type_names());

    let mut runner = Runner::new(registry, config.runner.clone(), config.template.clone(), cancel.clone());

    match runner.run(source.into_stream(cancel)).await {
        Ok(()) => {
            info!("Stopped gracefully");
            Ok(())
        }
        Err(EngineError::ShutdownTimeout { instances }) => {
            warn!("Stopped with {} instances aborted", instances.len());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Cancel `cancel` on Ctrl+C or, on unix, SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal, cleaning up...");
    cancel.cancel();
}
