// src/pool/thread_pool.rs
//! Fixed-size worker thread pool for CPU-bound tasks
//!
//! The pool owns N OS threads fed from a shared MPMC channel; each thread
//! executes one task at a time and reports the outcome back through the
//! task's own completion channel. All data crossing the dispatch boundary
//! is owned, never aliased.
//!
//! Each thread signals readiness before entering its receive loop. The pool
//! refuses dispatch until every unit has signalled; if readiness is not
//! reached within the startup window the pool enters a permanently
//! unavailable state and submissions fail fast with `PoolUnavailable`
//! instead of queuing indefinitely.

use crate::pool::protocol::{TaskRequest, WorkerEvent};
use crate::pool::tasks;
use crate::utils::config::PoolConfig;
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use ulid::Ulid;

/// One unit of dispatched work
struct Job {
    task_id: Ulid,
    request: TaskRequest,
    reply: oneshot::Sender<Result<Value>>,
}

/// Worker thread pool
pub struct WorkerThreadPool {
    /// Job sender; `None` once the pool has shut down
    jobs: parking_lot::Mutex<Option<crossbeam_channel::Sender<Job>>>,
    handles: parking_lot::Mutex<Vec<std::thread::JoinHandle<()>>>,
    available: AtomicBool,
    size: usize,
}

impl WorkerThreadPool {
    /// Spawn the worker threads and wait for all of them to signal ready
    pub fn new(config: PoolConfig) -> Self {
        let size = config.size.max(1);
        info!(size, "starting worker thread pool");

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded::<WorkerEvent>();
        let available = AtomicBool::new(false);

        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let rx = job_rx.clone();
            let ready = ready_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("vigil-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, rx, ready));
            match spawned {
                Ok(handle) => handles.push(handle),
                // A missing unit keeps the ready count short and the pool
                // lands in the unavailable state below
                Err(e) => error!(worker_id, "failed to spawn worker thread: {}", e),
            }
        }
        drop(ready_tx);

        // Collect readiness signals within the startup window
        let deadline = Instant::now() + Duration::from_millis(config.startup_timeout_ms);
        let mut ready_count = 0;
        while ready_count < size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ready_rx.recv_timeout(remaining) {
                Ok(WorkerEvent::Ready { worker_id }) => {
                    debug!(worker_id, "worker ready");
                    ready_count += 1;
                }
                Err(_) => break,
            }
        }

        if ready_count == size {
            available.store(true, Ordering::Release);
            info!(size, "worker pool ready");
        } else {
            error!(
                ready = ready_count,
                size, "worker pool failed to initialize; submissions will fail fast"
            );
        }

        Self {
            jobs: parking_lot::Mutex::new(Some(job_tx)),
            handles: parking_lot::Mutex::new(handles),
            available,
            size,
        }
    }

    /// Whether every unit signalled readiness at startup
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of submitted tasks not yet picked up by a worker
    pub fn queued(&self) -> usize {
        self.jobs.lock().as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Submit a `{type, data}` task and await its result.
    ///
    /// Suspends only the caller; other submissions proceed concurrently
    /// across distinct units. Fails with `UnknownTaskType` for an
    /// unregistered tag and with the handler's error message on handler
    /// failure.
    pub async fn submit(&self, task_type: &str, payload: Value) -> Result<Value> {
        if !self.is_available() {
            return Err(EngineError::PoolUnavailable);
        }

        let request = TaskRequest::decode(task_type, payload)?;
        let task_id = Ulid::new();
        let (reply_tx, reply_rx) = oneshot::channel();

        trace!(%task_id, task_type, "submitting task");
        let sender = self
            .jobs
            .lock()
            .as_ref()
            .cloned()
            .ok_or(EngineError::PoolUnavailable)?;
        sender
            .send(Job {
                task_id,
                request,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::PoolUnavailable)?;

        reply_rx
            .await
            .map_err(|_| EngineError::Runtime("worker dropped task reply".into()))?
    }

    /// Close the queue and join all worker threads. Queued jobs drain
    /// before the threads exit; new submissions fail fast.
    pub fn shutdown(&self) {
        info!("shutting down worker pool");
        self.available.store(false, Ordering::Release);

        // Dropping the sender ends the worker recv loops once the queue
        // drains
        self.jobs.lock().take();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(
    worker_id: usize,
    jobs: crossbeam_channel::Receiver<Job>,
    ready: crossbeam_channel::Sender<WorkerEvent>,
) {
    // One-time readiness signal before accepting any work
    if ready.send(WorkerEvent::Ready { worker_id }).is_err() {
        // Pool construction already gave up on us
        return;
    }

    while let Ok(job) = jobs.recv() {
        trace!(worker_id, task_id = %job.task_id, "worker picked up task");

        // A panicking handler must not take the unit down; it is reported
        // through the completion channel like any other failure.
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tasks::execute(job.request)
        }));

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!(worker_id, "task handler panicked: {}", msg);
                Err(EngineError::TaskFailed(msg))
            }
        };

        // Caller may have given up waiting; that is not an error here
        let _ = job.reply.send(result);
    }

    debug!(worker_id, "worker loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn test_pool(size: usize) -> WorkerThreadPool {
        WorkerThreadPool::new(PoolConfig {
            size,
            startup_timeout_ms: 5000,
        })
    }

    #[tokio::test]
    async fn test_pool_becomes_ready() {
        let pool = test_pool(2);
        assert!(pool.is_available());
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn test_unknown_task_type() {
        let pool = test_pool(1);
        let err = pool.submit("definitely-not-a-task", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTaskType(_)));
    }

    #[tokio::test]
    async fn test_benchmark_round_trip() {
        let pool = test_pool(2);
        let result = pool
            .submit("benchmark", json!({"iterations": 1000}))
            .await
            .unwrap();
        assert_eq!(result["iterations"], 1000);
    }

    #[tokio::test]
    async fn test_manifest_absent_fallback_through_pool() {
        let pool = test_pool(1);
        let result = pool
            .submit("parse-manifest", json!({"path": "/no/such/package.json"}))
            .await
            .unwrap();
        assert_eq!(result["name"], "");
    }

    #[tokio::test]
    async fn test_handler_failure_reported_not_thrown() {
        let pool = test_pool(1);
        // analyze-code on a directory fails inside the handler
        let err = pool
            .submit("analyze-code", json!({"path": "/"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Io(_) | EngineError::TaskFailed(_)
        ));
        // The unit survives and keeps serving
        let ok = pool.submit("benchmark", json!({"iterations": 10})).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_then_submit_fails_fast() {
        let pool = test_pool(2);
        pool.shutdown();
        let err = pool
            .submit("benchmark", json!({"iterations": 10}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PoolUnavailable));
    }

    #[tokio::test]
    async fn test_concurrent_submissions() {
        let pool = Arc::new(test_pool(4));
        let mut handles = Vec::new();

        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.submit("benchmark", json!({"iterations": 5000})).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
