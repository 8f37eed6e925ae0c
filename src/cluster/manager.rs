// src/cluster/manager.rs
//! Worker process supervision
//!
//! The primary forks `worker_count` copies of the current executable, each
//! a full instance of the application, and restarts crashed workers under a
//! per-worker restart budget (max restarts per rolling minute). A worker
//! that exhausts its budget is abandoned; the primary keeps serving with
//! the remaining workers.
//!
//! Workers are told who they are through environment variables:
//! `VIGIL_WORKER_ID` carries the ordinal, `VIGIL_CLUSTER_SOCKET` the
//! control-socket path. The restart-count map lives only in the primary
//! and is never shared with workers.

use crate::cluster::ipc::{ControlServer, WorkerLink};
use crate::utils::config::ClusterConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Environment variable carrying a worker's ordinal
pub const WORKER_ID_ENV: &str = "VIGIL_WORKER_ID";
/// Environment variable carrying the control-socket path
pub const SOCKET_PATH_ENV: &str = "VIGIL_CLUSTER_SOCKET";

/// Window over which restart counts decay
const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// What `initialize` decided for this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRole {
    /// Supervises workers; application code must not run here
    Primary,

    /// Runs the application. With clustering disabled the sole process is
    /// worker 0.
    Worker { id: usize },
}

/// How a worker terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Clean,
    Crashed { code: i32 },
    Killed { signal: i32 },
}

/// Classify an exit status into clean/crash/signal
pub fn classify_exit(status: ExitStatus) -> WorkerExit {
    if status.success() {
        WorkerExit::Clean
    } else if let Some(signal) = status.signal() {
        WorkerExit::Killed { signal }
    } else {
        WorkerExit::Crashed {
            code: status.code().unwrap_or(-1),
        }
    }
}

/// Per-worker restart counters with rolling-minute decay
pub struct RestartTracker {
    counts: HashMap<usize, u32>,
    max_per_minute: u32,
}

impl RestartTracker {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            counts: HashMap::new(),
            max_per_minute,
        }
    }

    /// Consume one restart slot for `worker_id`. Returns false once the
    /// budget for the rolling window is spent.
    pub fn try_restart(&mut self, worker_id: usize) -> bool {
        let count = self.counts.entry(worker_id).or_insert(0);
        if *count >= self.max_per_minute {
            return false;
        }
        *count += 1;
        true
    }

    /// Return one restart slot after the window elapses
    pub fn decay(&mut self, worker_id: usize) {
        if let Some(count) = self.counts.get_mut(&worker_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&worker_id);
            }
        }
    }

    pub fn count(&self, worker_id: usize) -> u32 {
        self.counts.get(&worker_id).copied().unwrap_or(0)
    }
}

/// Shared context for forking workers, used at startup and on restart
struct ForkCtx {
    exe: PathBuf,
    socket_path: String,
    children: Mutex<HashMap<usize, u32>>,
    exit_tx: mpsc::UnboundedSender<(usize, ExitStatus)>,
}

impl ForkCtx {
    /// Fork one worker and watch for its exit
    fn fork_worker(self: &Arc<Self>, ordinal: usize) -> Result<()> {
        let mut child = Command::new(&self.exe)
            .env(WORKER_ID_ENV, ordinal.to_string())
            .env(SOCKET_PATH_ENV, &self.socket_path)
            .spawn()
            .map_err(|e| {
                EngineError::ProcessSpawnFailed(format!("worker {}: {}", ordinal, e))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("worker exited instantly".into()))?;
        self.children.lock().insert(ordinal, pid);
        info!(ordinal, pid, "worker forked");

        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let _ = ctx.exit_tx.send((ordinal, status));
                }
                Err(e) => error!(ordinal, "wait on worker failed: {}", e),
            }
        });

        Ok(())
    }
}

struct PrimaryHandle {
    control: ControlServer,
    ctx: Arc<ForkCtx>,
    shutting_down: Arc<AtomicBool>,
    supervisor: JoinHandle<()>,
}

/// Cluster manager: role detection, forking, supervision, relay
pub struct ClusterManager {
    config: ClusterConfig,
    role: ClusterRole,
    primary: Option<PrimaryHandle>,
    link: Option<WorkerLink>,
}

impl ClusterManager {
    /// Decide this process's role and act on it.
    ///
    /// - clustering disabled: no forking, this process is worker 0
    /// - forked worker (`VIGIL_WORKER_ID` set): connect the control link
    /// - primary: bind the control socket, fork all workers, start the
    ///   exit supervisor
    ///
    /// A `Primary` return means the caller must not run application code
    /// in this process; a `Worker` return means continue into the normal
    /// application path.
    pub async fn initialize(config: ClusterConfig) -> Result<Self> {
        if !config.enabled {
            debug!("clustering disabled, continuing as sole worker");
            return Ok(Self {
                config,
                role: ClusterRole::Worker { id: 0 },
                primary: None,
                link: None,
            });
        }

        if let Ok(raw) = std::env::var(WORKER_ID_ENV) {
            let id: usize = raw
                .parse()
                .map_err(|_| EngineError::Runtime(format!("bad {}: {}", WORKER_ID_ENV, raw)))?;
            let socket = std::env::var(SOCKET_PATH_ENV)
                .unwrap_or_else(|_| config.socket_path.clone());

            let link = WorkerLink::connect(Path::new(&socket), id).await?;
            info!(worker_id = id, "running as forked worker");
            return Ok(Self {
                config,
                role: ClusterRole::Worker { id },
                primary: None,
                link: Some(link),
            });
        }

        Self::initialize_primary(config).await
    }

    async fn initialize_primary(config: ClusterConfig) -> Result<Self> {
        let worker_count = config.effective_worker_count();
        info!(worker_count, "running as cluster primary");

        let control = ControlServer::bind(Path::new(&config.socket_path))?;
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(ForkCtx {
            exe: std::env::current_exe()?,
            socket_path: config.socket_path.clone(),
            children: Mutex::new(HashMap::new()),
            exit_tx,
        });

        // Inability to fork a required worker at startup is fatal
        for ordinal in 0..worker_count {
            ctx.fork_worker(ordinal)?;
        }

        let shutting_down = Arc::new(AtomicBool::new(false));
        let supervisor = tokio::spawn(supervise_exits(
            Arc::clone(&ctx),
            exit_rx,
            Arc::clone(&shutting_down),
            config.restart_delay_ms,
            config.max_restarts_per_minute,
        ));

        Ok(Self {
            config,
            role: ClusterRole::Primary,
            primary: Some(PrimaryHandle {
                control,
                ctx,
                shutting_down,
                supervisor,
            }),
            link: None,
        })
    }

    pub fn role(&self) -> ClusterRole {
        self.role
    }

    pub fn is_primary(&self) -> bool {
        self.role == ClusterRole::Primary
    }

    /// This process's worker ordinal (0 for the primary and for the sole
    /// process when clustering is disabled)
    pub fn worker_id(&self) -> usize {
        match self.role {
            ClusterRole::Primary => 0,
            ClusterRole::Worker { id } => id,
        }
    }

    /// Configured worker count; 1 when clustering is disabled
    pub fn worker_count(&self) -> usize {
        if self.config.enabled {
            self.config.effective_worker_count()
        } else {
            1
        }
    }

    /// Worker-side control link, present on forked workers only
    pub fn link(&self) -> Option<&WorkerLink> {
        self.link.as_ref()
    }

    /// Workers currently connected to the control channel (primary only)
    pub fn connected_workers(&self) -> usize {
        self.primary
            .as_ref()
            .map(|p| p.control.connected_workers())
            .unwrap_or(0)
    }

    /// Primary loop: block until SIGTERM/SIGINT, then terminate every live
    /// worker and return so the primary can exit.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        let Some(primary) = &self.primary else {
            return Err(EngineError::Runtime(
                "run_until_shutdown called on a worker".into(),
            ));
        };

        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }

        primary.shutting_down.store(true, Ordering::Release);
        self.terminate_workers(primary);
        primary.supervisor.abort();
        Ok(())
    }

    fn terminate_workers(&self, primary: &PrimaryHandle) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let children = primary.ctx.children.lock();
        for (&ordinal, &pid) in children.iter() {
            debug!(ordinal, pid, "sending SIGTERM to worker");
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(ordinal, "failed to signal worker: {}", e);
            }
        }
        info!(count = children.len(), "workers signalled for shutdown");
    }
}

/// Primary exit supervisor: classify worker exits, apply the restart
/// budget, and schedule restarts with a fixed delay.
async fn supervise_exits(
    ctx: Arc<ForkCtx>,
    mut exit_rx: mpsc::UnboundedReceiver<(usize, ExitStatus)>,
    shutting_down: Arc<AtomicBool>,
    restart_delay_ms: u64,
    max_restarts_per_minute: u32,
) {
    let tracker = Arc::new(Mutex::new(RestartTracker::new(max_restarts_per_minute)));

    while let Some((ordinal, status)) = exit_rx.recv().await {
        ctx.children.lock().remove(&ordinal);

        if shutting_down.load(Ordering::Acquire) {
            continue;
        }

        match classify_exit(status) {
            WorkerExit::Clean => {
                info!(ordinal, "worker exited cleanly, not restarting");
                continue;
            }
            WorkerExit::Crashed { code } => {
                warn!(ordinal, code, "worker crashed");
            }
            WorkerExit::Killed { signal } => {
                warn!(ordinal, signal, "worker killed by signal");
            }
        }

        if !tracker.lock().try_restart(ordinal) {
            // Crash loop: abandon this worker, keep serving with the rest
            error!(
                ordinal,
                max_restarts_per_minute, "restart budget exceeded, abandoning worker"
            );
            continue;
        }

        // Return the slot once the rolling window has passed
        let decay_tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_WINDOW).await;
            decay_tracker.lock().decay(ordinal);
        });

        // Debounce rapid crash loops without holding up other workers
        let restart_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(restart_delay_ms)).await;
            info!(ordinal, "restarting worker");
            if let Err(e) = restart_ctx.fork_worker(ordinal) {
                error!(ordinal, "restart failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_budget() {
        let mut tracker = RestartTracker::new(3);

        assert!(tracker.try_restart(1));
        assert!(tracker.try_restart(1));
        assert!(tracker.try_restart(1));
        // Budget spent
        assert!(!tracker.try_restart(1));
        assert_eq!(tracker.count(1), 3);

        // Other workers have their own budget
        assert!(tracker.try_restart(2));
    }

    #[test]
    fn test_restart_budget_decay() {
        let mut tracker = RestartTracker::new(2);
        assert!(tracker.try_restart(7));
        assert!(tracker.try_restart(7));
        assert!(!tracker.try_restart(7));

        tracker.decay(7);
        assert_eq!(tracker.count(7), 1);
        assert!(tracker.try_restart(7));
        assert!(!tracker.try_restart(7));

        tracker.decay(7);
        tracker.decay(7);
        assert_eq!(tracker.count(7), 0);
    }

    #[test]
    fn test_classify_exit() {
        assert_eq!(
            classify_exit(ExitStatus::from_raw(0)),
            WorkerExit::Clean
        );
        // Exit code 1 → status 1 << 8 in wait(2) encoding
        assert_eq!(
            classify_exit(ExitStatus::from_raw(1 << 8)),
            WorkerExit::Crashed { code: 1 }
        );
        // Killed by SIGKILL (9)
        assert_eq!(
            classify_exit(ExitStatus::from_raw(9)),
            WorkerExit::Killed { signal: 9 }
        );
    }

    #[tokio::test]
    async fn test_disabled_clustering_is_sole_worker() {
        let config = ClusterConfig {
            enabled: false,
            ..Default::default()
        };
        let manager = ClusterManager::initialize(config).await.unwrap();

        assert!(!manager.is_primary());
        assert_eq!(manager.role(), ClusterRole::Worker { id: 0 });
        assert_eq!(manager.worker_id(), 0);
        assert_eq!(manager.worker_count(), 1);
        assert!(manager.link().is_none());
    }
}
