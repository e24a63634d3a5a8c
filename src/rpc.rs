//! The local control socket (spec §4.6, §6): length-framed JSON over a
//! Unix domain socket, not HTTP — a deliberate divergence from
//! `original_source/server/rpc.py`'s FastAPI/uvicorn transport, taken
//! because spec §6 literally specifies "a connection-oriented stream"
//! accepting "length-framed JSON requests", not an HTTP endpoint. The
//! command set, dispatch logic, and `DaemonState` shape otherwise mirror
//! `rpc.py` exactly.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::scheduler::SyncScheduler;
use crate::store::{Store, SyncMode};

/// Frames larger than this are rejected; no legitimate request or
/// response under this protocol approaches it.
const MAX_FRAME_BYTES: u32 = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub cmd: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn ok(data: serde_json::Value) -> Self {
        Self { ok: true, data, error: None }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { ok: false, data: serde_json::Value::Null, error: Some(message.into()) }
    }
}

/// Mutable runtime state shared across the daemon, read (never written)
/// by the RPC surface per spec §5's shared-resource policy.
pub struct DaemonState {
    started_at: DateTime<Utc>,
    shutdown_requested: AtomicBool,
    shutdown_notify: Notify,
    store: Store,
    pub engine: Option<Arc<SyncEngine>>,
    pub scheduler: Option<Arc<SyncScheduler>>,
}

impl DaemonState {
    pub fn new(store: Store, engine: Option<Arc<SyncEngine>>, scheduler: Option<Arc<SyncScheduler>>) -> Self {
        Self {
            started_at: Utc::now(),
            shutdown_requested: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            store,
            engine,
            scheduler,
        }
    }

    fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    async fn status(&self) -> Result<serde_json::Value> {
        let mut status = serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "started_at": self.started_at.to_rfc3339(),
            "store": {
                "mappings": self.store.count_mappings().await?,
                "unmatched": self.store.count_unmatched().await?,
                "collections": self.store.count_collections().await?,
                "runs": self.store.count_runs().await?,
            },
        });
        if let Some(engine) = &self.engine {
            status["sync"] = serde_json::to_value(engine.status().await).unwrap_or_default();
        }
        if let Some(scheduler) = &self.scheduler {
            status["scheduler"] = serde_json::to_value(scheduler.status().await).unwrap_or_default();
        }
        Ok(status)
    }

    pub fn request_shutdown(&self) {
        tracing::info!("shutdown_requested");
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.shutdown_notify.notified().await;
    }
}

fn parse_mode_param(params: &serde_json::Value) -> Option<SyncMode> {
    params.get("mode")?.as_str()?.parse::<SyncMode>().ok()
}

async fn dispatch(cmd: &str, params: &serde_json::Value, state: &DaemonState) -> RpcResponse {
    match cmd {
        "ping" => RpcResponse::ok(serde_json::Value::Object(Default::default())),

        "status" => match state.status().await {
            Ok(data) => RpcResponse::ok(data),
            Err(err) => RpcResponse::err(err.to_string()),
        },

        "health" => RpcResponse::ok(serde_json::json!({ "uptime_seconds": state.uptime_seconds() })),

        "shutdown" => {
            state.request_shutdown();
            RpcResponse::ok(serde_json::json!({ "message": "shutdown initiated" }))
        }

        "sync_now" => match &state.scheduler {
            None => RpcResponse::err("sync not configured"),
            Some(scheduler) => {
                let mode = parse_mode_param(params);
                scheduler.trigger_now(mode).await;
                let mode_label = mode.map(|m| m.as_str()).unwrap_or("default");
                RpcResponse::ok(serde_json::json!({ "message": format!("sync triggered (mode={mode_label})") }))
            }
        },

        "pause" => match &state.scheduler {
            None => RpcResponse::err("sync not configured"),
            Some(scheduler) => {
                scheduler.pause();
                RpcResponse::ok(serde_json::json!({ "message": "sync paused" }))
            }
        },

        "resume" => match &state.scheduler {
            None => RpcResponse::err("sync not configured"),
            Some(scheduler) => {
                scheduler.resume();
                RpcResponse::ok(serde_json::json!({ "message": "sync resumed" }))
            }
        },

        other => RpcResponse::err(format!("unknown command: {other}")),
    }
}

/// Serve RPC connections until `state` signals shutdown. The caller is
/// responsible for removing any stale socket file beforehand (spec
/// §6: "removed at startup only if no process is listening" — see
/// `crate::daemon::ensure_clean_socket`).
pub async fn serve(socket_path: &Path, state: Arc<DaemonState>) -> Result<()> {
    let listener = UnixListener::bind(socket_path)
        .map_err(|e| SyncError::Fatal(anyhow::anyhow!("binding control socket {}: {e}", socket_path.display())))?;

    tracing::info!(path = %socket_path.display(), "rpc_listening");

    loop {
        tokio::select! {
            _ = state.wait_for_shutdown() => {
                tracing::info!("rpc_shutdown");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _addr) = accepted.map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state).await {
                        tracing::warn!(error = %err, "rpc_connection_error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
    loop {
        let frame = match read_frame(&mut stream).await? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        let response = match serde_json::from_slice::<RpcRequest>(&frame) {
            Ok(request) => {
                tracing::info!(cmd = %request.cmd, "rpc_request");
                let response = dispatch(&request.cmd, &request.params, &state).await;
                if !response.ok {
                    tracing::warn!(cmd = %request.cmd, error = ?response.error, "rpc_error");
                }
                response
            }
            Err(err) => RpcResponse::err(format!("malformed request: {err}")),
        };

        let encoded = serde_json::to_vec(&response)
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
        write_frame(&mut stream, &encoded).await?;
    }
}

async fn read_frame(stream: &mut UnixStream) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(SyncError::Fatal(anyhow::Error::new(e))),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(SyncError::Fatal(anyhow::anyhow!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")));
    }

    let mut body = vec![0u8; len as usize];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
    Ok(Some(body))
}

async fn write_frame(stream: &mut UnixStream, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| SyncError::Fatal(anyhow::anyhow!("response of {} bytes exceeds u32::MAX", body.len())))?;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
    stream
        .write_all(body)
        .await
        .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
    Ok(())
}
