// src/cluster/mod.rs
//! OS-process clustering
//!
//! - **Manager**: role detection, worker forking, rate-limited restarts,
//!   graceful shutdown
//! - **IPC**: control-channel protocol and broadcast relay over a unix
//!   socket
//!
//! No memory is shared between primary and workers; all coordination is
//! message passing and OS signals.

pub mod ipc;
pub mod manager;

pub use ipc::{ClusterMessage, ControlServer, WorkerLink};
pub use manager::{classify_exit, ClusterManager, ClusterRole, RestartTracker, WorkerExit};
