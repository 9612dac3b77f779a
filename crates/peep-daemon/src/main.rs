use anyhow::Result;
use peep_alert::engine::AlertEngine;
use peep_storage::retention::RetentionManager;
use peep_storage::Store;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod ingest;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("peep=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "peep.toml".to_string());
    let config = DaemonConfig::load_or_default(&config_path)?;

    tracing::info!(
        db = %config.db_path,
        tick_secs = config.engine.tick_secs,
        "peep daemon starting"
    );

    let store = Arc::new(Store::open(Path::new(&config.db_path))?);
    let engine = Arc::new(AlertEngine::new(store.clone(), config.engine_config())?);
    let retention = Arc::new(RetentionManager::new(&store, config.retention_config()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine_handle = tokio::spawn(engine.clone().run(shutdown_rx.clone()));
    let retention_handle = tokio::spawn(retention.clone().run(shutdown_rx.clone()));
    let ingest_handle = config.ingest.stdin.then(|| {
        tokio::spawn(ingest::run_stdin(
            store.clone(),
            retention.clone(),
            config.ingest.sweep_every,
            shutdown_rx.clone(),
        ))
    });

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    shutdown_tx.send(true).ok();

    if let Err(e) = engine_handle.await? {
        tracing::error!(error = %e, "Alert engine exited with error");
    }
    retention_handle.await?;
    if let Some(handle) = ingest_handle {
        handle.await?;
    }

    tracing::info!("Daemon stopped");
    Ok(())
}
