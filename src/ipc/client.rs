//! Client half of the host/shim protocol: connects to the host's socket,
//! auto-spawning it once if nothing is listening yet, and exposes a simple
//! request/response API plus a broadcast subscription for `ptyUpdate` and
//! friends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::framing::{Frame, FrameHeader, FrameReader};

const CONNECT_RETRIES: usize = 25;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(120);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpcClientError {
    #[error("Shim client detached")]
    Detached,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Remote(String),
}

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<Result<Option<Value>, String>>>>>;
type BroadcastCallback = Box<dyn Fn(FrameHeader, Vec<Vec<u8>>) + Send>;

/// Connects to the host's IPC socket and manages the request/response
/// lifecycle for a single attached session.
pub struct IpcClient {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: PendingMap,
    next_id: AtomicU64,
    detached: Arc<AtomicBool>,
    on_detached: Arc<StdMutex<Option<Box<dyn FnOnce() + Send>>>>,
    broadcast_subs: Arc<StdMutex<Vec<BroadcastCallback>>>,
}

impl IpcClient {
    /// Connects to `socket_path`, spawning the host with `--shim` once if
    /// the first connection attempt fails, then sends `hello`.
    pub async fn connect(socket_path: &Path, client_id: impl Into<String>) -> Result<Self, IpcClientError> {
        let client_id = client_id.into();
        let stream = match UnixStream::connect(socket_path).await {
            Ok(stream) => stream,
            Err(_) => {
                spawn_host_process(socket_path);
                retry_connect(socket_path).await?
            }
        };

        let client = Self::from_stream(stream);
        client.request("hello", Some(serde_json::json!({ "clientId": client_id })), Vec::new()).await?;
        Ok(client)
    }

    fn from_stream(stream: UnixStream) -> Self {
        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let detached = Arc::new(AtomicBool::new(false));
        let on_detached: Arc<StdMutex<Option<Box<dyn FnOnce() + Send>>>> = Arc::new(StdMutex::new(None));
        let broadcast_subs: Arc<StdMutex<Vec<BroadcastCallback>>> = Arc::new(StdMutex::new(Vec::new()));

        let pending_for_read = Arc::clone(&pending);
        let detached_for_read = Arc::clone(&detached);
        let on_detached_for_read = Arc::clone(&on_detached);
        let broadcast_for_read = Arc::clone(&broadcast_subs);

        tokio::spawn(async move {
            let mut reader = FrameReader::new();
            let mut buf = vec![0u8; 8192];
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                reader.push(&buf[..n]);
                loop {
                    match reader.next_frame() {
                        Ok(Some(frame)) => handle_incoming(
                            frame,
                            &pending_for_read,
                            &detached_for_read,
                            &on_detached_for_read,
                            &broadcast_for_read,
                        ),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "malformed frame from host, closing");
                            return fire_detached(&detached_for_read, &on_detached_for_read);
                        }
                    }
                }
            }
            fire_detached(&detached_for_read, &on_detached_for_read);
        });

        Self { tx, pending, next_id: AtomicU64::new(0), detached, on_detached, broadcast_subs }
    }

    /// Registers a callback fired exactly once: on receipt of a `detached`
    /// frame, or when the socket closes after a successful attach. If the
    /// client is already detached, fires immediately.
    pub fn on_shim_detached(&self, callback: impl FnOnce() + Send + 'static) {
        if self.detached.load(Ordering::SeqCst) {
            callback();
            return;
        }
        *self.on_detached.lock().unwrap() = Some(Box::new(callback));
    }

    /// Registers a callback for every non-request/response frame (`ptyUpdate`,
    /// `ptyExit`, `ptyLifecycle`, `ptyTitle`).
    pub fn subscribe_broadcasts(&self, callback: impl Fn(FrameHeader, Vec<Vec<u8>>) + Send + 'static) {
        self.broadcast_subs.lock().unwrap().push(Box::new(callback));
    }

    pub async fn set_host_colors(&self, fg: [u8; 3], bg: [u8; 3]) -> Result<Option<Value>, IpcClientError> {
        self.request("setHostColors", Some(serde_json::json!({ "fg": fg, "bg": bg })), Vec::new()).await
    }

    /// Sends a request and awaits its response. Fails immediately without
    /// sending if this client has already observed `detached`.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        payloads: Vec<Vec<u8>>,
    ) -> Result<Option<Value>, IpcClientError> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(IpcClientError::Detached);
        }

        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (resolve_tx, resolve_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id.clone(), resolve_tx);

        let header = FrameHeader::request(request_id.clone(), method, params);
        let bytes = Frame::new(header, payloads).encode().map_err(|e| IpcClientError::Transport(e.to_string()))?;
        if self.tx.send(bytes).is_err() {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(IpcClientError::Transport("connection closed".to_string()));
        }

        match resolve_rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(IpcClientError::Remote(error)),
            Err(_) => Err(IpcClientError::Detached),
        }
    }
}

fn handle_incoming(
    frame: Frame,
    pending: &PendingMap,
    detached: &Arc<AtomicBool>,
    on_detached: &Arc<StdMutex<Option<Box<dyn FnOnce() + Send>>>>,
    broadcast_subs: &Arc<StdMutex<Vec<BroadcastCallback>>>,
) {
    match frame.header {
        FrameHeader::Response { request_id, ok, result, error, .. } => {
            if let Some(resolver) = pending.lock().unwrap().remove(&request_id) {
                let outcome = if ok { Ok(result) } else { Err(error.unwrap_or_default()) };
                let _ = resolver.send(outcome);
            }
        }
        FrameHeader::Detached => fire_detached(detached, on_detached),
        other => {
            debug!(?other, "dispatching broadcast frame");
            for callback in broadcast_subs.lock().unwrap().iter() {
                callback(other.clone(), frame.payloads.clone());
            }
        }
    }
}

fn fire_detached(detached: &Arc<AtomicBool>, on_detached: &Arc<StdMutex<Option<Box<dyn FnOnce() + Send>>>>) {
    if detached.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(callback) = on_detached.lock().unwrap().take() {
        callback();
    }
}

async fn retry_connect(socket_path: &Path) -> Result<UnixStream, IpcClientError> {
    for attempt in 0..CONNECT_RETRIES {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt + 1 == CONNECT_RETRIES => {
                return Err(IpcClientError::Transport(e.to_string()));
            }
            Err(_) => tokio::time::sleep(CONNECT_RETRY_DELAY).await,
        }
    }
    Err(IpcClientError::Transport("exhausted connection retries".to_string()))
}

/// Re-execs the current binary in shim-host mode, pointed at `socket_path`.
/// Fire-and-forget: failures here surface as a connection error from the
/// subsequent retry loop instead.
fn spawn_host_process(socket_path: &Path) {
    let Ok(exe) = std::env::current_exe() else {
        return;
    };
    match std::process::Command::new(exe).arg("--shim").arg("--socket-path").arg(socket_path).spawn() {
        Ok(_) => debug!(path = %socket_path.display(), "spawned host process"),
        Err(e) => warn!(error = %e, "failed to spawn host process"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::logging::LogBuffer;
    use crate::pty::PtyHost;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn test_config(socket_path: PathBuf) -> HostConfig {
        let mut config = HostConfig::default();
        config.socket_path = socket_path;
        config.hot_scrollback_limit = 200;
        config.line_cache_capacity = 50;
        config.shutdown_grace_period = Duration::from_millis(5);
        config
    }

    fn spawn_server(dir: &tempfile::TempDir) -> PathBuf {
        let socket_path = dir.path().join("mux.sock");
        let config = test_config(socket_path.clone());
        let host = PtyHost::new(config.clone());
        let logs = Arc::new(LogBuffer::new(100));
        let server = super::super::IpcServer::new(config, host, logs);
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        socket_path
    }

    #[tokio::test]
    async fn connect_and_round_trip_a_request() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);
        let client = IpcClient::connect(&socket_path, "test-client").await.unwrap();

        let result = client.request("createPty", Some(serde_json::json!({"cols": 80, "rows": 24})), Vec::new()).await.unwrap();
        assert!(result.unwrap().get("ptyId").is_some());
    }

    #[tokio::test]
    async fn on_shim_detached_fires_once_when_a_second_client_takes_over() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);

        let a = IpcClient::connect(&socket_path, "a").await.unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        a.on_shim_detached(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        let _b = IpcClient::connect(&socket_path, "b").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while tokio::time::Instant::now() < deadline && fired.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let err = a.request("listAll", None, Vec::new()).await.unwrap_err();
        assert_eq!(err, IpcClientError::Detached);
    }
}
