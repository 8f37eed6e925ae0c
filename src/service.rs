// src/service.rs
//! Debug service facade
//!
//! Plain-data entry points for the HTTP route layer. The service owns no
//! protocol knowledge: every operation returns a serializable struct or an
//! `Option` for "not found", and the route layer does its own status-code
//! mapping. Constructed once at process start and passed by handle; there
//! are no global singletons.

use crate::monitor::{
    DebugMetricsConfig, DebugMetricsConfigPatch, MetricsSnapshot, PerformanceMonitor,
};
use crate::pool::WorkerThreadPool;
use crate::registry::{
    AgentMetrics, AgentResourceSummary, ProcessFilter, ProcessRegistry, ProcessSummary,
    TrackedProcess,
};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Collection status returned by the metrics operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsStatus {
    pub active: bool,
    pub config: DebugMetricsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<MetricsSnapshot>,
}

/// Result of a force-GC request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcOutcome {
    pub success: bool,
    pub message: String,
}

/// Process listing plus the directory-wide summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessListing {
    pub processes: Vec<TrackedProcess>,
    pub summary: ProcessSummary,
}

/// Agent listing plus the aggregate resource summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentListing {
    pub agents: Vec<AgentMetrics>,
    pub summary: AgentResourceSummary,
}

/// One service object wiring monitor, registry, and pool together
pub struct DebugService {
    monitor: Arc<PerformanceMonitor>,
    registry: Arc<ProcessRegistry>,
    pool: Arc<WorkerThreadPool>,
}

impl DebugService {
    /// Wire the components together; the registry becomes the monitor's
    /// process provider.
    pub fn new(
        monitor: Arc<PerformanceMonitor>,
        registry: Arc<ProcessRegistry>,
        pool: Arc<WorkerThreadPool>,
    ) -> Self {
        monitor.attach_registry(Arc::clone(&registry));
        Self {
            monitor,
            registry,
            pool,
        }
    }

    /// Current collection state and latest snapshot, if any
    pub fn metrics_snapshot(&self) -> MetricsStatus {
        MetricsStatus {
            active: self.monitor.is_active(),
            config: self.monitor.config(),
            snapshot: self.monitor.latest_snapshot(),
        }
    }

    /// Start collection, optionally applying a sanitized partial config
    /// first
    pub fn start_collection(&self, patch: Option<DebugMetricsConfigPatch>) -> MetricsStatus {
        if let Some(patch) = patch {
            self.monitor.update_config(patch);
        }
        self.monitor.start();
        MetricsStatus {
            active: true,
            config: self.monitor.config(),
            snapshot: None,
        }
    }

    pub fn stop_collection(&self) -> MetricsStatus {
        self.monitor.stop();
        MetricsStatus {
            active: false,
            config: self.monitor.config(),
            snapshot: None,
        }
    }

    pub fn force_gc(&self) -> GcOutcome {
        if self.monitor.force_gc() {
            GcOutcome {
                success: true,
                message: "allocator trim triggered".to_string(),
            }
        } else {
            GcOutcome {
                success: false,
                message: "no manual collection hook on this platform".to_string(),
            }
        }
    }

    pub fn clear_history(&self) {
        self.monitor.clear_history();
    }

    /// List tracked processes with the directory-wide summary
    pub fn list_processes(&self, filter: &ProcessFilter) -> ProcessListing {
        ProcessListing {
            processes: self.registry.get_processes(filter),
            summary: self.registry.get_process_summary(),
        }
    }

    /// Look up one process; an unknown id is `None`, not an error
    pub fn get_process(&self, id: &str) -> Result<Option<TrackedProcess>> {
        validate_id(id)?;
        Ok(self.registry.get_process(id))
    }

    pub fn list_agents(&self) -> AgentListing {
        AgentListing {
            agents: self.registry.get_agent_processes_with_metrics(),
            summary: self.registry.get_agent_resource_summary(),
        }
    }

    pub fn get_agent_metrics(&self, id: &str) -> Result<Option<AgentMetrics>> {
        validate_id(id)?;
        Ok(self.registry.get_agent_metrics(id))
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn pool(&self) -> &Arc<WorkerThreadPool> {
        &self.pool
    }

    /// Stop the monitor and drain the pool
    pub fn shutdown(&self) {
        info!("debug service shutting down");
        self.monitor.stop();
        self.pool.shutdown();
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 256 {
        return Err(EngineError::Validation(
            "id must be 1-256 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProcessKind, ProcessStatus};
    use crate::utils::config::PoolConfig;

    fn service() -> DebugService {
        DebugService::new(
            Arc::new(PerformanceMonitor::new(DebugMetricsConfig::default())),
            Arc::new(ProcessRegistry::new()),
            Arc::new(WorkerThreadPool::new(PoolConfig {
                size: 1,
                startup_timeout_ms: 5000,
            })),
        )
    }

    #[tokio::test]
    async fn test_metrics_lifecycle() {
        let svc = service();

        let status = svc.metrics_snapshot();
        assert!(!status.active);
        assert!(status.snapshot.is_none());

        let status = svc.start_collection(Some(DebugMetricsConfigPatch {
            collection_interval_ms: Some(50), // clamps to 100
            ..Default::default()
        }));
        assert!(status.active);
        assert_eq!(status.config.collection_interval_ms, 100);

        let status = svc.stop_collection();
        assert!(!status.active);
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_id_validation() {
        let svc = service();

        assert!(matches!(
            svc.get_process(""),
            Err(EngineError::Validation(_))
        ));
        let long = "x".repeat(257);
        assert!(matches!(
            svc.get_process(&long),
            Err(EngineError::Validation(_))
        ));

        // Valid but unknown id is a normal miss
        assert!(svc.get_process("unknown").unwrap().is_none());
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_process_and_agent_views() {
        let svc = service();
        let mut agent = TrackedProcess::new("a1", ProcessKind::Agent, "runner");
        agent.status = ProcessStatus::Running;
        agent.cpu_percent = Some(5.0);
        agent.memory_bytes = Some(1024);
        svc.registry().register(agent);
        svc.registry()
            .register(TrackedProcess::new("t1", ProcessKind::Terminal, "shell"));

        let listing = svc.list_processes(&ProcessFilter::default());
        assert_eq!(listing.processes.len(), 2);
        assert_eq!(listing.summary.total, 2);

        let agents = svc.list_agents();
        assert_eq!(agents.agents.len(), 1);
        assert_eq!(agents.summary.agent_count, 1);

        assert!(svc.get_agent_metrics("a1").unwrap().is_some());
        assert!(svc.get_agent_metrics("t1").unwrap().is_none());
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_force_gc_shape() {
        let svc = service();
        let outcome = svc.force_gc();
        assert!(!outcome.message.is_empty());
        svc.shutdown();
    }
}
