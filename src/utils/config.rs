// src/utils/config.rs
//! Engine configuration
//!
//! Layered configuration: built-in defaults overridden by `VIGIL_*`
//! environment variables. Read once at startup; components receive their
//! sections by value.
//!
//! Examples:
//!
//! ```text
//! VIGIL_CLUSTER__ENABLED=true
//! VIGIL_CLUSTER__WORKER_COUNT=4
//! VIGIL_POOL__SIZE=8
//! VIGIL_MONITOR__COLLECTION_INTERVAL_MS=5000
//! ```

use crate::monitor::DebugMetricsConfig;
use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};

/// Cluster supervision settings, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Whether to fork worker processes at all
    pub enabled: bool,

    /// Number of workers to fork (0 = logical CPU count)
    pub worker_count: usize,

    /// Delay before re-forking a crashed worker (milliseconds)
    pub restart_delay_ms: u64,

    /// Maximum automatic restarts per worker per rolling minute
    pub max_restarts_per_minute: u32,

    /// Unix socket path for the worker control channel
    pub socket_path: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_count: 0,
            restart_delay_ms: 1000,
            max_restarts_per_minute: 5,
            socket_path: "/tmp/vigil-cluster.sock".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Effective worker count: configured value, or logical CPUs when 0
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Worker thread pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads
    pub size: usize,

    /// How long to wait for all threads to signal readiness (milliseconds)
    pub startup_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            startup_timeout_ms: 5000,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cluster: ClusterConfig,
    pub pool: PoolConfig,
    pub monitor: DebugMetricsConfig,
}

impl EngineConfig {
    /// Load configuration from defaults and `VIGIL_*` environment variables
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("VIGIL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: EngineConfig = settings.try_deserialize()?;
        // Bounds are enforced here so unclamped values never reach the
        // collection loop.
        cfg.monitor = cfg.monitor.sanitize();
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert!(!cfg.cluster.enabled);
        assert_eq!(cfg.cluster.max_restarts_per_minute, 5);
        assert_eq!(cfg.pool.size, 4);
    }

    #[test]
    fn test_effective_worker_count_fallback() {
        let cfg = ClusterConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(cfg.effective_worker_count() >= 1);

        let cfg = ClusterConfig {
            worker_count: 3,
            ..Default::default()
        };
        assert_eq!(cfg.effective_worker_count(), 3);
    }
}
