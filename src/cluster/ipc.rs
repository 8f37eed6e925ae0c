// src/cluster/ipc.rs
//! Cluster control channel
//!
//! Primary and workers exchange newline-delimited JSON over a unix domain
//! socket owned by the primary. The message set is a closed tagged enum,
//! decoded exhaustively at each receiver; it is distinct from the
//! worker-pool protocol and the two are never unified.
//!
//! Relay semantics: a worker publishes `broadcast`; the primary fans it out
//! unchanged to every *other* connected worker (no echo-back to the
//! sender).

use crate::utils::errors::{EngineError, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

/// Messages on the cluster control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClusterMessage {
    /// First message on every worker connection
    Hello {
        #[serde(rename = "workerId")]
        worker_id: usize,
    },

    /// Worker → primary; relayed unchanged to all other workers
    Broadcast { data: Value },
}

impl ClusterMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

type WorkerSinks = Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<ClusterMessage>>>>;

/// Primary-side control server: accepts worker connections and relays
/// broadcasts between them
pub struct ControlServer {
    sinks: WorkerSinks,
    accept_task: JoinHandle<()>,
}

impl ControlServer {
    /// Bind the control socket, replacing any stale file at `path`
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "cluster control socket bound");

        let sinks: WorkerSinks = Arc::new(Mutex::new(HashMap::new()));
        let accept_sinks = Arc::clone(&sinks);

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_worker_connection(stream, Arc::clone(&accept_sinks)));
                    }
                    Err(e) => {
                        warn!("control socket accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { sinks, accept_task })
    }

    /// Number of currently connected workers
    pub fn connected_workers(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One worker connection on the primary: register on hello, relay
/// broadcasts to every other registered worker, unregister on disconnect.
async fn handle_worker_connection(stream: UnixStream, sinks: WorkerSinks) {
    let mut framed = Framed::new(stream, LinesCodec::new());

    // The connection identifies itself before anything else
    let worker_id = match framed.next().await {
        Some(Ok(line)) => match ClusterMessage::decode(&line) {
            Ok(ClusterMessage::Hello { worker_id }) => worker_id,
            Ok(other) => {
                warn!(?other, "worker connection opened without hello, dropping");
                return;
            }
            Err(e) => {
                warn!("undecodable control message on new connection: {}", e);
                return;
            }
        },
        _ => return,
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClusterMessage>();
    sinks.lock().insert(worker_id, out_tx);
    debug!(worker_id, "worker connected to control channel");

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(message) = outbound else { break };
                let Ok(line) = message.encode() else { continue };
                if framed.send(line).await.is_err() {
                    break;
                }
            }
            inbound = framed.next() => {
                match inbound {
                    Some(Ok(line)) => match ClusterMessage::decode(&line) {
                        Ok(ClusterMessage::Broadcast { data }) => {
                            relay(&sinks, worker_id, data);
                        }
                        Ok(ClusterMessage::Hello { .. }) => {
                            warn!(worker_id, "duplicate hello ignored");
                        }
                        Err(e) => warn!(worker_id, "undecodable control message: {}", e),
                    },
                    _ => break,
                }
            }
        }
    }

    sinks.lock().remove(&worker_id);
    debug!(worker_id, "worker disconnected from control channel");
}

/// Fan a broadcast out to every worker except the sender
fn relay(sinks: &WorkerSinks, from: usize, data: Value) {
    let sinks = sinks.lock();
    for (&worker_id, sink) in sinks.iter() {
        if worker_id == from {
            continue;
        }
        let _ = sink.send(ClusterMessage::Broadcast { data: data.clone() });
    }
}

/// Worker-side handle to the control channel
pub struct WorkerLink {
    outbound: mpsc::UnboundedSender<ClusterMessage>,
    incoming: broadcast::Sender<Value>,
    io_task: JoinHandle<()>,
}

impl WorkerLink {
    /// Connect to the primary's control socket and identify ourselves
    pub async fn connect(path: &Path, worker_id: usize) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let mut framed = Framed::new(stream, LinesCodec::new());

        framed
            .send(ClusterMessage::Hello { worker_id }.encode()?)
            .await
            .map_err(|e| EngineError::Runtime(format!("control hello failed: {}", e)))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClusterMessage>();
        let (in_tx, _) = broadcast::channel(64);
        let incoming = in_tx.clone();

        let io_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        let Some(message) = outbound else { break };
                        let Ok(line) = message.encode() else { continue };
                        if framed.send(line).await.is_err() {
                            break;
                        }
                    }
                    inbound = framed.next() => {
                        match inbound {
                            Some(Ok(line)) => match ClusterMessage::decode(&line) {
                                Ok(ClusterMessage::Broadcast { data }) => {
                                    let _ = in_tx.send(data);
                                }
                                Ok(ClusterMessage::Hello { .. }) => {}
                                Err(e) => warn!("undecodable broadcast: {}", e),
                            },
                            _ => break,
                        }
                    }
                }
            }
            debug!("worker control link closed");
        });

        Ok(Self {
            outbound: out_tx,
            incoming,
            io_task,
        })
    }

    /// Publish a broadcast to every other worker via the primary
    pub fn broadcast(&self, data: Value) -> Result<()> {
        self.outbound
            .send(ClusterMessage::Broadcast { data })
            .map_err(|_| EngineError::Runtime("control link closed".into()))
    }

    /// Subscribe to broadcasts relayed from other workers
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.incoming.subscribe()
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_message_wire_shape() {
        let msg = ClusterMessage::Broadcast {
            data: json!({"event": "reload"}),
        };
        let line = msg.encode().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "broadcast");
        assert_eq!(value["data"]["event"], "reload");

        let decoded = ClusterMessage::decode(&line).unwrap();
        assert_eq!(decoded, msg);

        let hello = ClusterMessage::Hello { worker_id: 2 }.encode().unwrap();
        let value: Value = serde_json::from_str(&hello).unwrap();
        assert_eq!(value["type"], "hello");
        assert_eq!(value["workerId"], 2);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(ClusterMessage::decode(r#"{"type":"mystery"}"#).is_err());
    }

    #[tokio::test]
    async fn test_broadcast_fans_out_but_not_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");

        let server = ControlServer::bind(&path).unwrap();

        let worker1 = WorkerLink::connect(&path, 1).await.unwrap();
        let worker2 = WorkerLink::connect(&path, 2).await.unwrap();
        let worker3 = WorkerLink::connect(&path, 3).await.unwrap();

        let mut rx1 = worker1.subscribe();
        let mut rx2 = worker2.subscribe();
        let mut rx3 = worker3.subscribe();

        // Give the hellos time to register
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.connected_workers(), 3);

        worker1.broadcast(json!({"msg": "hi"})).unwrap();

        let got2 = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got2["msg"], "hi");

        let got3 = tokio::time::timeout(Duration::from_secs(2), rx3.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got3["msg"], "hi");

        // No echo back to the sender
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx1.recv())
                .await
                .is_err()
        );
    }
}
