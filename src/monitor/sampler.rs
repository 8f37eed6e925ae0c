// src/monitor/sampler.rs
//! Process memory and CPU sampling
//!
//! Wraps `sysinfo` for the current process. CPU usage is a delta between
//! consecutive refreshes, normalized by the wall-clock time that elapsed
//! between them (sysinfo's own normalization); at least two samples are
//! required before a meaningful value exists, so the first tick yields
//! `None`.

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::trace;

/// One memory reading for the current process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,

    /// Resident set size in bytes
    pub used_bytes: u64,

    /// Virtual memory size in bytes
    pub virtual_bytes: u64,

    /// Total physical memory on the host in bytes
    pub total_bytes: u64,
}

/// One CPU reading for the current process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    pub timestamp: DateTime<Utc>,

    /// Percentage of one core used since the previous sample
    pub cpu_percent: f64,

    /// Collection-timer lag in milliseconds (scheduled vs actual fire)
    pub loop_lag_ms: f64,
}

/// Sampler for the current process
pub struct ProcessSampler {
    system: System,
    pid: Pid,
    refresh_count: u64,
}

impl ProcessSampler {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| EngineError::Runtime(format!("cannot resolve own pid: {}", e)))?;

        Ok(Self {
            system: System::new(),
            pid,
            refresh_count: 0,
        })
    }

    /// Refresh process and memory info from the OS. Call once per tick
    /// before reading samples.
    pub fn refresh(&mut self) {
        self.system.refresh_memory();
        self.system.refresh_process(self.pid);
        self.refresh_count += 1;
    }

    /// Memory reading from the last refresh
    pub fn sample_memory(&self) -> Result<MemorySample> {
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| EngineError::Runtime("own process missing from sysinfo".into()))?;

        let sample = MemorySample {
            timestamp: Utc::now(),
            used_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            total_bytes: self.system.total_memory(),
        };
        trace!(used = sample.used_bytes, "memory sampled");
        Ok(sample)
    }

    /// CPU usage from the last refresh; `None` until two refreshes exist
    pub fn sample_cpu(&self, loop_lag_ms: f64) -> Option<CpuSample> {
        if self.refresh_count < 2 {
            return None;
        }

        let process = self.system.process(self.pid)?;
        Some(CpuSample {
            timestamp: Utc::now(),
            cpu_percent: process.cpu_usage() as f64,
            loop_lag_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sample_nonzero() {
        let mut sampler = ProcessSampler::new().unwrap();
        sampler.refresh();

        let sample = sampler.sample_memory().unwrap();
        assert!(sample.used_bytes > 0);
        assert!(sample.total_bytes >= sample.used_bytes);
    }

    #[test]
    fn test_cpu_needs_two_refreshes() {
        let mut sampler = ProcessSampler::new().unwrap();
        sampler.refresh();
        assert!(sampler.sample_cpu(0.0).is_none());

        std::thread::sleep(std::time::Duration::from_millis(250));
        sampler.refresh();
        let sample = sampler.sample_cpu(1.5).unwrap();
        assert!(sample.cpu_percent >= 0.0);
        assert!((sample.loop_lag_ms - 1.5).abs() < f64::EPSILON);
    }
}
