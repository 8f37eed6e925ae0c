// src/monitor/performance_monitor.rs
//! Periodic system-health sampling with bounded history
//!
//! The monitor runs a timer-driven collection loop that samples process
//! memory, CPU usage, and collection-timer lag, pulls the current workload
//! list from a pluggable provider, detects memory-leak trends, and
//! publishes one immutable [`MetricsSnapshot`] per tick to all subscribers.
//!
//! History is held in fixed-capacity ring buffers (`max_data_points`);
//! the oldest entry is evicted on overflow. A failed sampler category is
//! logged and skipped — the snapshot still publishes with the remaining
//! categories.

use crate::monitor::sampler::{CpuSample, MemorySample, ProcessSampler};
use crate::monitor::trend::{compute_trend, MemoryTrend};
use crate::registry::{ProcessRegistry, ProcessSummary, TrackedProcess};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounds for [`DebugMetricsConfig::collection_interval_ms`]
pub const INTERVAL_BOUNDS_MS: (u64, u64) = (100, 60_000);
/// Bounds for [`DebugMetricsConfig::max_data_points`]
pub const DATA_POINT_BOUNDS: (usize, usize) = (10, 10_000);
/// Bounds for [`DebugMetricsConfig::leak_threshold_bytes`]
pub const LEAK_THRESHOLD_BOUNDS: (u64, u64) = (1024, 100 * 1024 * 1024);

/// Monitor operating parameters
///
/// All numeric fields are clamped by [`DebugMetricsConfig::sanitize`] before
/// they are stored; unclamped values never reach the collection loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugMetricsConfig {
    /// Sampling interval in milliseconds, clamped to [100, 60000]
    pub collection_interval_ms: u64,

    /// Ring-buffer capacity, clamped to [10, 10000]
    pub max_data_points: usize,

    /// Sustained window growth that flags a leak, clamped to [1 KiB, 100 MiB]
    pub leak_threshold_bytes: u64,

    pub memory_enabled: bool,
    pub cpu_enabled: bool,
    pub process_tracking_enabled: bool,
}

impl Default for DebugMetricsConfig {
    fn default() -> Self {
        Self {
            collection_interval_ms: 5000,
            max_data_points: 100,
            leak_threshold_bytes: 10 * 1024 * 1024,
            memory_enabled: true,
            cpu_enabled: true,
            process_tracking_enabled: true,
        }
    }
}

impl DebugMetricsConfig {
    /// Clamp every numeric field into its bounds
    pub fn sanitize(mut self) -> Self {
        self.collection_interval_ms = self
            .collection_interval_ms
            .clamp(INTERVAL_BOUNDS_MS.0, INTERVAL_BOUNDS_MS.1);
        self.max_data_points = self
            .max_data_points
            .clamp(DATA_POINT_BOUNDS.0, DATA_POINT_BOUNDS.1);
        self.leak_threshold_bytes = self
            .leak_threshold_bytes
            .clamp(LEAK_THRESHOLD_BOUNDS.0, LEAK_THRESHOLD_BOUNDS.1);
        self
    }

    /// Apply a partial update, then clamp
    pub fn apply(self, patch: DebugMetricsConfigPatch) -> Self {
        Self {
            collection_interval_ms: patch
                .collection_interval_ms
                .unwrap_or(self.collection_interval_ms),
            max_data_points: patch.max_data_points.unwrap_or(self.max_data_points),
            leak_threshold_bytes: patch
                .leak_threshold_bytes
                .unwrap_or(self.leak_threshold_bytes),
            memory_enabled: patch.memory_enabled.unwrap_or(self.memory_enabled),
            cpu_enabled: patch.cpu_enabled.unwrap_or(self.cpu_enabled),
            process_tracking_enabled: patch
                .process_tracking_enabled
                .unwrap_or(self.process_tracking_enabled),
        }
        .sanitize()
    }
}

/// Partial config as sent by the route layer; absent fields keep their
/// current values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugMetricsConfigPatch {
    pub collection_interval_ms: Option<u64>,
    pub max_data_points: Option<usize>,
    pub leak_threshold_bytes: Option<u64>,
    pub memory_enabled: Option<bool>,
    pub cpu_enabled: Option<bool>,
    pub process_tracking_enabled: Option<bool>,
}

/// One immutable sampling tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySample>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSample>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<TrackedProcess>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_summary: Option<ProcessSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_trend: Option<MemoryTrend>,
}

/// Event published to subscribers on every completed tick
#[derive(Debug, Clone)]
pub struct MetricsEvent {
    pub timestamp: DateTime<Utc>,
    pub snapshot: MetricsSnapshot,
}

/// Pluggable source of the current workload list
pub type ProcessProvider = Arc<dyn Fn() -> Vec<TrackedProcess> + Send + Sync>;

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct MonitorState {
    config: DebugMetricsConfig,
    memory_history: VecDeque<MemorySample>,
    cpu_history: VecDeque<CpuSample>,
    snapshots: VecDeque<MetricsSnapshot>,
    provider: Option<ProcessProvider>,
    running: Option<RunningLoop>,
}

impl MonitorState {
    fn truncate_to(&mut self, max: usize) {
        while self.memory_history.len() > max {
            self.memory_history.pop_front();
        }
        while self.cpu_history.len() > max {
            self.cpu_history.pop_front();
        }
        while self.snapshots.len() > max {
            self.snapshots.pop_front();
        }
    }
}

struct Inner {
    state: Mutex<MonitorState>,
    events: broadcast::Sender<MetricsEvent>,
}

/// Periodic performance monitor
pub struct PerformanceMonitor {
    inner: Arc<Inner>,
}

impl PerformanceMonitor {
    pub fn new(config: DebugMetricsConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState {
                    config: config.sanitize(),
                    memory_history: VecDeque::new(),
                    cpu_history: VecDeque::new(),
                    snapshots: VecDeque::new(),
                    provider: None,
                    running: None,
                }),
                events,
            }),
        }
    }

    /// Register the workload-list source used for process tracking.
    ///
    /// Typically wired to [`ProcessRegistry::all_processes`]; see
    /// [`PerformanceMonitor::attach_registry`].
    pub fn set_process_provider(&self, provider: ProcessProvider) {
        self.inner.state.lock().provider = Some(provider);
    }

    /// Convenience wiring of a registry as the process provider
    pub fn attach_registry(&self, registry: Arc<ProcessRegistry>) {
        self.set_process_provider(Arc::new(move || registry.all_processes()));
    }

    /// Start the collection loop. A second call while running warns and
    /// leaves the existing timer untouched.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.running.is_some() {
            warn!("performance monitor already running, ignoring start");
            return;
        }

        let interval = state.config.collection_interval_ms;
        state.running = Some(Self::spawn_loop(Arc::clone(&self.inner), interval));
        info!(interval_ms = interval, "performance monitor started");
    }

    /// Stop the collection loop. Safe to call when already stopped. A tick
    /// that has started runs to completion; only the pending timer is
    /// cancelled.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if let Some(running) = state.running.take() {
            running.cancel.cancel();
            drop(running.handle);
            info!("performance monitor stopped");
        }
    }

    /// Whether the collection loop is active
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().running.is_some()
    }

    pub fn config(&self) -> DebugMetricsConfig {
        self.inner.state.lock().config.clone()
    }

    /// Apply a partial config update.
    ///
    /// The patch is sanitized, stored atomically, and — when the monitor is
    /// running — the timer restarts at the new interval without dropping
    /// the running state. Shrinking `max_data_points` truncates existing
    /// history immediately, oldest first.
    pub fn update_config(&self, patch: DebugMetricsConfigPatch) -> DebugMetricsConfig {
        let mut state = self.inner.state.lock();
        let new_config = state.config.clone().apply(patch);
        let interval_changed =
            new_config.collection_interval_ms != state.config.collection_interval_ms;

        state.config = new_config.clone();
        state.truncate_to(new_config.max_data_points);

        if state.running.is_some() && interval_changed {
            if let Some(running) = state.running.take() {
                running.cancel.cancel();
            }
            state.running = Some(Self::spawn_loop(
                Arc::clone(&self.inner),
                new_config.collection_interval_ms,
            ));
            debug!(
                interval_ms = new_config.collection_interval_ms,
                "collection timer restarted with new interval"
            );
        }

        new_config
    }

    /// Most recent snapshot; `None` until the first tick has completed
    pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.inner.state.lock().snapshots.back().cloned()
    }

    /// Read-only view of the memory ring buffer
    pub fn memory_history(&self) -> Vec<MemorySample> {
        self.inner.state.lock().memory_history.iter().cloned().collect()
    }

    /// Read-only view of the CPU ring buffer
    pub fn cpu_history(&self) -> Vec<CpuSample> {
        self.inner.state.lock().cpu_history.iter().cloned().collect()
    }

    /// Empty both ring buffers and drop retained snapshots without changing
    /// run/stop status
    pub fn clear_history(&self) {
        let mut state = self.inner.state.lock();
        state.memory_history.clear();
        state.cpu_history.clear();
        state.snapshots.clear();
        debug!("metrics history cleared");
    }

    /// Trigger the allocator's manual release hook if the runtime has one.
    ///
    /// Returns false without doing anything when no such hook exists on
    /// this platform — a capability check, not an error.
    pub fn force_gc(&self) -> bool {
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        {
            // glibc: return unused arena pages to the OS
            unsafe {
                libc::malloc_trim(0);
            }
            info!("malloc_trim invoked");
            true
        }
        #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
        {
            false
        }
    }

    /// Subscribe to per-tick metrics events
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.inner.events.subscribe()
    }

    fn spawn_loop(inner: Arc<Inner>, interval_ms: u64) -> RunningLoop {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut sampler = match ProcessSampler::new() {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("process sampler unavailable: {}", e);
                    None
                }
            };

            let mut timer = tokio::time::interval(Duration::from_millis(interval_ms));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval() fires immediately; the first tick is the start tick
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    deadline = timer.tick() => {
                        let lag = tokio::time::Instant::now()
                            .saturating_duration_since(deadline)
                            .as_secs_f64() * 1000.0;
                        Self::collect_tick(&inner, sampler.as_mut(), lag);
                    }
                }
            }
            debug!("collection loop exited");
        });

        RunningLoop { cancel, handle }
    }

    /// One collection tick. Individual sampler failures are logged and the
    /// snapshot is published with the remaining categories.
    fn collect_tick(inner: &Arc<Inner>, sampler: Option<&mut ProcessSampler>, loop_lag_ms: f64) {
        let (config, provider) = {
            let state = inner.state.lock();
            (state.config.clone(), state.provider.clone())
        };

        let mut memory = None;
        let mut cpu = None;

        if let Some(sampler) = sampler {
            sampler.refresh();

            if config.memory_enabled {
                match sampler.sample_memory() {
                    Ok(sample) => memory = Some(sample),
                    Err(e) => warn!("memory sampling failed: {}", e),
                }
            }

            if config.cpu_enabled {
                cpu = sampler.sample_cpu(loop_lag_ms);
            }
        }

        let (processes, process_summary) = match (&provider, config.process_tracking_enabled) {
            (Some(provider), true) => {
                let list = provider();
                let summary = ProcessRegistry::summarize(&list);
                (Some(list), Some(summary))
            }
            _ => (None, None),
        };

        let mut state = inner.state.lock();
        let max = state.config.max_data_points;

        if let Some(sample) = &memory {
            state.memory_history.push_back(sample.clone());
        }
        if let Some(sample) = &cpu {
            state.cpu_history.push_back(sample.clone());
        }

        let used: Vec<u64> = state.memory_history.iter().map(|m| m.used_bytes).collect();
        let memory_trend = compute_trend(&used, state.config.leak_threshold_bytes);

        let snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            memory,
            cpu,
            processes,
            process_summary,
            memory_trend,
        };
        state.snapshots.push_back(snapshot.clone());
        state.truncate_to(max);
        drop(state);

        // Nobody listening is fine
        let _ = inner.events.send(MetricsEvent {
            timestamp: snapshot.timestamp,
            snapshot,
        });
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProcessKind, ProcessStatus};
    use proptest::prelude::*;

    fn fast_config() -> DebugMetricsConfig {
        DebugMetricsConfig {
            collection_interval_ms: 1000,
            max_data_points: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_clamps() {
        let cfg = DebugMetricsConfig {
            collection_interval_ms: 50,
            max_data_points: 0,
            leak_threshold_bytes: 10,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.collection_interval_ms, 100);
        assert_eq!(cfg.max_data_points, 10);
        assert_eq!(cfg.leak_threshold_bytes, 1024);

        let cfg = DebugMetricsConfig {
            collection_interval_ms: 999_999,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.collection_interval_ms, 60_000);
    }

    proptest! {
        #[test]
        fn prop_sanitize_always_in_bounds(
            interval in 0u64..10_000_000,
            points in 0usize..1_000_000,
            threshold in 0u64..u64::MAX / 2,
        ) {
            let cfg = DebugMetricsConfig {
                collection_interval_ms: interval,
                max_data_points: points,
                leak_threshold_bytes: threshold,
                ..Default::default()
            }
            .sanitize();
            prop_assert!((100..=60_000).contains(&cfg.collection_interval_ms));
            prop_assert!((10..=10_000).contains(&cfg.max_data_points));
            prop_assert!((1024..=100 * 1024 * 1024).contains(&cfg.leak_threshold_bytes));
        }
    }

    #[test]
    fn test_patch_apply_partial() {
        let cfg = DebugMetricsConfig::default();
        let patched = cfg.clone().apply(DebugMetricsConfigPatch {
            collection_interval_ms: Some(50),
            cpu_enabled: Some(false),
            ..Default::default()
        });
        assert_eq!(patched.collection_interval_ms, 100); // clamped
        assert!(!patched.cpu_enabled);
        assert_eq!(patched.max_data_points, cfg.max_data_points);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let monitor = PerformanceMonitor::new(fast_config());
        assert!(!monitor.is_active());

        monitor.start();
        assert!(monitor.is_active());
        monitor.start(); // warns, no-op
        assert!(monitor.is_active());

        monitor.stop();
        assert!(!monitor.is_active());
        monitor.stop(); // safe when already stopped
        assert!(!monitor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_single_timer() {
        let monitor = PerformanceMonitor::new(fast_config());
        let mut rx = monitor.subscribe();

        monitor.start();
        monitor.start();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(1000)).await;
        }
        monitor.stop();
        tokio::task::yield_now().await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        // One immediate tick plus one per interval; a duplicate timer would
        // roughly double this
        assert!(received >= 5, "expected at least 5 events, got {}", received);
        assert!(received <= 6, "expected at most 6 events, got {}", received);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifteen_intervals_build_trend() {
        let monitor = PerformanceMonitor::new(fast_config());
        monitor.start();

        for _ in 0..15 {
            tokio::time::advance(Duration::from_millis(1000)).await;
        }
        monitor.stop();
        tokio::task::yield_now().await;

        assert!(!monitor.memory_history().is_empty());
        let snapshot = monitor.latest_snapshot().expect("snapshot after 15 intervals");
        let trend = snapshot.memory_trend.expect("trend after >=10 samples");
        assert!(trend.sample_count >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trend_absent_below_ten_samples() {
        let monitor = PerformanceMonitor::new(fast_config());
        monitor.start();

        // Immediate tick plus 4 intervals: 5 memory samples
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(1000)).await;
        }
        monitor.stop();
        tokio::task::yield_now().await;

        let snapshot = monitor.latest_snapshot().unwrap();
        assert!(snapshot.memory_trend.is_none());
        assert!(monitor.memory_history().len() < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_bounded_fifo() {
        let monitor = PerformanceMonitor::new(DebugMetricsConfig {
            collection_interval_ms: 1000,
            max_data_points: 10,
            ..Default::default()
        });
        monitor.start();

        for _ in 0..25 {
            tokio::time::advance(Duration::from_millis(1000)).await;
        }
        monitor.stop();
        tokio::task::yield_now().await;

        let history = monitor.memory_history();
        assert!(history.len() <= 10);
        // FIFO eviction keeps the most recent samples in order
        for pair in history.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_max_data_points_truncates() {
        let monitor = PerformanceMonitor::new(fast_config());
        monitor.start();

        for _ in 0..20 {
            tokio::time::advance(Duration::from_millis(1000)).await;
        }
        assert!(monitor.memory_history().len() > 10);

        monitor.update_config(DebugMetricsConfigPatch {
            max_data_points: Some(10),
            ..Default::default()
        });
        assert!(monitor.memory_history().len() <= 10);
        assert!(monitor.is_active());
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_feeds_process_summary() {
        let monitor = PerformanceMonitor::new(fast_config());
        monitor.set_process_provider(Arc::new(|| {
            let mut a = TrackedProcess::new("a1", ProcessKind::Agent, "runner");
            a.status = ProcessStatus::Running;
            let mut b = TrackedProcess::new("a2", ProcessKind::Agent, "planner");
            b.status = ProcessStatus::Idle;
            vec![a, b]
        }));

        monitor.start();
        tokio::time::advance(Duration::from_millis(1000)).await;
        monitor.stop();
        tokio::task::yield_now().await;

        let snapshot = monitor.latest_snapshot().unwrap();
        let summary = snapshot.process_summary.expect("summary from provider");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_type["agent"], 2);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_history_keeps_running() {
        let monitor = PerformanceMonitor::new(fast_config());
        monitor.start();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(1000)).await;
        }
        assert!(!monitor.memory_history().is_empty());

        monitor.clear_history();
        assert!(monitor.memory_history().is_empty());
        assert!(monitor.cpu_history().is_empty());
        assert!(monitor.latest_snapshot().is_none());
        assert!(monitor.is_active());
        monitor.stop();
    }

    #[test]
    fn test_force_gc_capability() {
        let monitor = PerformanceMonitor::new(DebugMetricsConfig::default());
        let result = monitor.force_gc();
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        assert!(result);
        #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
        assert!(!result);
    }

    #[tokio::test]
    async fn test_latest_snapshot_none_before_first_tick() {
        let monitor = PerformanceMonitor::new(DebugMetricsConfig::default());
        assert!(monitor.latest_snapshot().is_none());
    }
}
