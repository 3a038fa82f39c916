//! Headless entity-version monitor.
//!
//! Reuses the persisted session of the dashboard client, polls the entity
//! versions endpoint and refreshes stale cached collections until Ctrl+C.

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use erp_admin_client::{diagnostics, events};
use erp_admin_client::{
    start_version_monitor, ApiClient, CacheRefresher, ClientConfig, SqliteStore,
    VersionReconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(diagnostics::get_data_dir);
    let _log_guard = diagnostics::init_logging(&diagnostics::get_log_dir(&data_dir));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("ERP_CLIENT_GIT_SHA"),
        data_dir = %data_dir.display(),
        "erp-version-monitor starting"
    );

    let store = SqliteStore::init(&data_dir)
        .with_context(|| format!("opening client state in {}", data_dir.display()))?;
    let monitor_interval = config.monitor_interval;
    let min_interval = config.version_min_interval;
    let client = ApiClient::builder(config)
        .store(Arc::new(store))
        .build()
        .context("building API client")?;

    let reconciler = VersionReconciler::new(client.clone());
    match reconciler.migrate_legacy_key() {
        Ok(true) => info!("migrated legacy version map"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "legacy version map migration failed"),
    }

    tokio::spawn(events::log_events(client.subscribe()));

    let shutdown = CancellationToken::new();
    let handle = start_version_monitor(
        reconciler,
        CacheRefresher::new(client),
        monitor_interval,
        min_interval,
        shutdown.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("shutdown requested");
    shutdown.cancel();
    handle.await.context("version monitor task panicked")?;
    Ok(())
}
