// src/main.rs
//! Vigil Engine
//!
//! Forks and supervises worker processes, each of which runs the full
//! observability stack: worker thread pool, process registry, and
//! performance monitor.

use anyhow::Result;
use std::sync::Arc;
use vigil_engine::cluster::{ClusterManager, ClusterRole};
use vigil_engine::monitor::PerformanceMonitor;
use vigil_engine::observability::init_tracing;
use vigil_engine::pool::WorkerThreadPool;
use vigil_engine::registry::ProcessRegistry;
use vigil_engine::service::DebugService;
use vigil_engine::utils::config::EngineConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting Vigil Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load()?;
    info!("Configuration loaded: {:?}", config);

    let cluster = ClusterManager::initialize(config.cluster.clone()).await?;
    match cluster.role() {
        ClusterRole::Primary => {
            // Supervision only; application code runs in the workers
            info!(workers = cluster.worker_count(), "primary supervising workers");
            cluster.run_until_shutdown().await?;
            info!("primary stopped");
            return Ok(());
        }
        ClusterRole::Worker { id } => {
            info!(worker_id = id, "continuing as worker");
        }
    }

    let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone()));
    let registry = Arc::new(ProcessRegistry::new());
    let pool = Arc::new(WorkerThreadPool::new(config.pool.clone()));

    let service = DebugService::new(monitor, registry, pool);
    service.start_collection(None);

    // Graceful shutdown on CTRL+C / SIGTERM (forwarded by the primary)
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, cleaning up"),
        _ = sigterm.recv() => info!("received SIGTERM, cleaning up"),
    }

    service.shutdown();
    info!("worker stopped gracefully");
    Ok(())
}
