// src/registry/mod.rs
//! Tracked workload directory
//!
//! - **Process Registry**: authoritative in-memory directory of agents,
//!   terminals, CLIs, and pool workers with resource metrics and
//!   summary/agent-specific views

pub mod process_registry;

pub use process_registry::{
    AgentMetrics, AgentResourceSummary, ProcessFilter, ProcessKind, ProcessRegistry,
    ProcessStatus, ProcessSummary, TrackedProcess,
};
