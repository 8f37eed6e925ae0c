// src/lib.rs
//! Vigil Engine
//!
//! Process supervision and runtime observability for agent workloads.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **cluster**: OS-process forking, rate-limited restarts, broadcast relay
//! - **pool**: fixed-size worker thread pool for CPU-bound tasks
//! - **registry**: in-memory directory of tracked workloads with metrics
//! - **monitor**: periodic memory/CPU/loop-lag sampling and leak detection
//! - **service**: plain-data facade consumed by the route layer
//! - **observability**: tracing initialization
//! - **utils**: configuration and error types
//!
//! Each forked worker runs an independent copy of the whole application,
//! including its own pool, registry, and monitor; nothing below the cluster
//! layer is shared across processes.

pub mod cluster;
pub mod monitor;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod service;
pub mod utils;

// Re-export commonly used types
pub use cluster::{ClusterManager, ClusterRole};
pub use monitor::{DebugMetricsConfig, MetricsSnapshot, PerformanceMonitor};
pub use pool::WorkerThreadPool;
pub use registry::{ProcessRegistry, TrackedProcess};
pub use service::DebugService;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
