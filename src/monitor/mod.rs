// src/monitor/mod.rs
//! Runtime performance monitoring
//!
//! This module samples process-wide health on a timer and keeps bounded
//! history:
//!
//! - **Performance Monitor**: collection loop, snapshot assembly, pub/sub
//! - **Sampler**: process memory/CPU readings via `sysinfo`
//! - **Trend**: linear-regression memory-leak detection with confidence
//!
//! # Architecture
//!
//! ```text
//! timer tick ──► sample memory ──► memory ring (max_data_points)
//!           ├──► sample CPU+lag ─► cpu ring    (max_data_points)
//!           ├──► process provider ─► summary
//!           └──► trend (≥10 samples) ─► MetricsSnapshot ─► subscribers
//! ```

pub mod performance_monitor;
pub mod sampler;
pub mod trend;

pub use performance_monitor::{
    DebugMetricsConfig, DebugMetricsConfigPatch, MetricsEvent, MetricsSnapshot,
    PerformanceMonitor, ProcessProvider,
};
pub use sampler::{CpuSample, MemorySample, ProcessSampler};
pub use trend::{compute_trend, MemoryTrend, MIN_TREND_SAMPLES};
