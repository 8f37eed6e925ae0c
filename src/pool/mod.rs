// src/pool/mod.rs
//! Worker thread pool for CPU-bound tasks
//!
//! - **Thread Pool**: fixed-size pool with readiness handshake and
//!   fail-fast unavailability
//! - **Protocol**: closed tagged request/response types for the
//!   dispatch boundary
//! - **Tasks**: manifest parsing, directory scanning, structural code
//!   analysis, synthetic benchmark
//!
//! # Architecture
//!
//! ```text
//! submit(type, data) ─► decode ─► MPMC queue ─► worker thread
//!        ▲                                          │
//!        └────────── oneshot completion ◄───────────┘
//! ```

pub mod protocol;
pub mod tasks;
pub mod thread_pool;

pub use protocol::{TaskRequest, TaskResponse, WorkerEvent};
pub use thread_pool::WorkerThreadPool;
