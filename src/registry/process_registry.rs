// src/registry/process_registry.rs
//! In-memory directory of tracked workloads
//!
//! The registry is the authoritative record of every supervised unit of
//! work in this process: agent runs, terminal sessions, CLI invocations,
//! and pool workers. Entries are mutated only through registry methods;
//! summary counts are recomputed from the live directory on every query so
//! they can never drift from the entries themselves.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Kind of tracked workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Agent,
    Terminal,
    Cli,
    Worker,
    Other,
}

impl ProcessKind {
    /// Stable string tag used in summaries and filters
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Agent => "agent",
            ProcessKind::Terminal => "terminal",
            ProcessKind::Cli => "cli",
            ProcessKind::Worker => "worker",
            ProcessKind::Other => "other",
        }
    }
}

/// Lifecycle status of a tracked workload
///
/// Transitions are monotonic except `Running ⇄ Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Idle,
    Stopping,
    Stopped,
    Error,
}

impl ProcessStatus {
    /// Whether the workload still counts as live capacity
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Idle
        )
    }

    /// Terminal or terminating statuses, excluded from default listings
    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcessStatus::Stopping | ProcessStatus::Stopped)
    }
}

/// One supervised workload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedProcess {
    /// Unique id across all workload kinds
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ProcessKind,

    /// Human-readable name
    pub name: String,

    pub status: ProcessStatus,

    pub started_at: DateTime<Utc>,

    /// CPU usage as a percentage of one core, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,

    /// Resident memory in bytes, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,

    /// Correlation tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
}

impl TrackedProcess {
    /// Create a new entry in `Starting` state
    pub fn new(id: impl Into<String>, kind: ProcessKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            status: ProcessStatus::Starting,
            started_at: Utc::now(),
            cpu_percent: None,
            memory_bytes: None,
            session_id: None,
            feature_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }
}

/// Filter for process listings; empty filter matches everything retained
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessFilter {
    #[serde(rename = "type")]
    pub kind: Option<ProcessKind>,
    pub status: Option<ProcessStatus>,
    pub session_id: Option<String>,
    pub feature_id: Option<String>,
    /// Include `stopping`/`stopped` entries (default: false)
    pub include_stopped: bool,
}

/// Aggregate counts over the current directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub total: usize,
    /// `running` + `starting`
    pub running: usize,
    pub idle: usize,
    /// `stopped` + `stopping`
    pub stopped: usize,
    pub errored: usize,
    pub by_type: HashMap<String, usize>,
}

/// Per-agent resource metrics view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub id: String,
    pub name: String,
    pub status: ProcessStatus,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
}

/// Aggregate resource usage across all agent workloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResourceSummary {
    pub agent_count: usize,
    pub active_count: usize,
    pub total_cpu_percent: f64,
    pub total_memory_bytes: u64,
    pub peak_cpu_percent: f64,
    pub peak_memory_bytes: u64,
}

/// Process registry: the authoritative workload directory
pub struct ProcessRegistry {
    processes: DashMap<String, TrackedProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }

    /// Register a workload. Re-registering an existing id replaces the
    /// previous entry (last writer wins).
    pub fn register(&self, process: TrackedProcess) {
        debug!(id = %process.id, kind = process.kind.as_str(), "registering process");
        if self.processes.insert(process.id.clone(), process).is_some() {
            warn!("replaced existing registry entry with same id");
        }
    }

    /// Update the status of a workload. Returns false if the id is unknown.
    pub fn update_status(&self, id: &str, status: ProcessStatus) -> bool {
        match self.processes.get_mut(id) {
            Some(mut entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    /// Update resource metrics for a workload. Returns false if unknown.
    pub fn update_metrics(&self, id: &str, cpu_percent: f64, memory_bytes: u64) -> bool {
        match self.processes.get_mut(id) {
            Some(mut entry) => {
                entry.cpu_percent = Some(cpu_percent);
                entry.memory_bytes = Some(memory_bytes);
                true
            }
            None => false,
        }
    }

    /// Mark a workload stopped, retaining the entry until pruned
    pub fn mark_stopped(&self, id: &str) -> bool {
        self.update_status(id, ProcessStatus::Stopped)
    }

    /// Remove an entry outright. Returns the removed entry, if any.
    pub fn remove(&self, id: &str) -> Option<TrackedProcess> {
        self.processes.remove(id).map(|(_, p)| p)
    }

    /// Drop stopped entries older than the retention window
    pub fn prune_stopped(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let before = self.processes.len();
        self.processes
            .retain(|_, p| !(p.status == ProcessStatus::Stopped && p.started_at < cutoff));
        let pruned = before - self.processes.len();
        if pruned > 0 {
            debug!(pruned, "pruned stopped registry entries");
        }
        pruned
    }

    /// Exact lookup; an absent id is a normal negative result
    pub fn get_process(&self, id: &str) -> Option<TrackedProcess> {
        self.processes.get(id).map(|e| e.clone())
    }

    /// List entries matching the filter
    pub fn get_processes(&self, filter: &ProcessFilter) -> Vec<TrackedProcess> {
        self.processes
            .iter()
            .filter(|e| {
                let p = e.value();
                if !filter.include_stopped && p.status.is_terminated() {
                    return false;
                }
                if let Some(kind) = filter.kind {
                    if p.kind != kind {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if p.status != status {
                        return false;
                    }
                }
                if let Some(session) = &filter.session_id {
                    if p.session_id.as_deref() != Some(session.as_str()) {
                        return false;
                    }
                }
                if let Some(feature) = &filter.feature_id {
                    if p.feature_id.as_deref() != Some(feature.as_str()) {
                        return false;
                    }
                }
                true
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Snapshot of the full directory, stopped entries included
    pub fn all_processes(&self) -> Vec<TrackedProcess> {
        self.processes.iter().map(|e| e.value().clone()).collect()
    }

    /// Aggregate counts, recomputed from the directory on every call
    pub fn get_process_summary(&self) -> ProcessSummary {
        Self::summarize(&self.all_processes())
    }

    /// Compute a summary over an arbitrary workload list
    pub fn summarize(processes: &[TrackedProcess]) -> ProcessSummary {
        let mut summary = ProcessSummary {
            total: processes.len(),
            running: 0,
            idle: 0,
            stopped: 0,
            errored: 0,
            by_type: HashMap::new(),
        };

        for p in processes {
            match p.status {
                ProcessStatus::Running | ProcessStatus::Starting => summary.running += 1,
                ProcessStatus::Idle => summary.idle += 1,
                ProcessStatus::Stopped | ProcessStatus::Stopping => summary.stopped += 1,
                ProcessStatus::Error => summary.errored += 1,
            }
            *summary.by_type.entry(p.kind.as_str().to_string()).or_insert(0) += 1;
        }

        summary
    }

    /// All agent workloads with their resource metrics
    pub fn get_agent_processes_with_metrics(&self) -> Vec<AgentMetrics> {
        self.processes
            .iter()
            .filter(|e| e.value().kind == ProcessKind::Agent)
            .map(|e| Self::agent_metrics_view(e.value()))
            .collect()
    }

    /// Resource metrics for one agent
    pub fn get_agent_metrics(&self, id: &str) -> Option<AgentMetrics> {
        self.processes
            .get(id)
            .filter(|e| e.kind == ProcessKind::Agent)
            .map(|e| Self::agent_metrics_view(e.value()))
    }

    /// Aggregate resource usage across all agents
    pub fn get_agent_resource_summary(&self) -> AgentResourceSummary {
        let agents = self.get_agent_processes_with_metrics();

        let mut summary = AgentResourceSummary {
            agent_count: agents.len(),
            active_count: 0,
            total_cpu_percent: 0.0,
            total_memory_bytes: 0,
            peak_cpu_percent: 0.0,
            peak_memory_bytes: 0,
        };

        for agent in &agents {
            if agent.status.is_active() {
                summary.active_count += 1;
            }
            summary.total_cpu_percent += agent.cpu_percent;
            summary.total_memory_bytes += agent.memory_bytes;
            summary.peak_cpu_percent = summary.peak_cpu_percent.max(agent.cpu_percent);
            summary.peak_memory_bytes = summary.peak_memory_bytes.max(agent.memory_bytes);
        }

        summary
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    fn agent_metrics_view(p: &TrackedProcess) -> AgentMetrics {
        AgentMetrics {
            id: p.id.clone(),
            name: p.name.clone(),
            status: p.status,
            cpu_percent: p.cpu_percent.unwrap_or(0.0),
            memory_bytes: p.memory_bytes.unwrap_or(0),
            started_at: p.started_at,
            session_id: p.session_id.clone(),
            feature_id: p.feature_id.clone(),
        }
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
