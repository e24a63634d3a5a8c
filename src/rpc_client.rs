//! A thin client for the control socket (spec §4.6). Stands in for "the
//! interface the core consumes" — the CLI's terminal rendering is out of
//! scope per spec §1, but something has to speak the framed-JSON
//! protocol in tests, and a real CLI binary would be built on exactly
//! this.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::{Result, SyncError};
use crate::rpc::{RpcRequest, RpcResponse};

const MAX_FRAME_BYTES: u32 = 1024 * 1024;

pub struct RpcClient {
    stream: UnixStream,
}

impl RpcClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| SyncError::Fatal(anyhow::anyhow!("connecting to {}: {e}", socket_path.display())))?;
        Ok(Self { stream })
    }

    pub async fn call(&mut self, cmd: &str, params: serde_json::Value) -> Result<RpcResponse> {
        let request = RpcRequest { cmd: cmd.to_string(), params };
        let encoded =
            serde_json::to_vec(&request).map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;

        let len = u32::try_from(encoded.len())
            .map_err(|_| SyncError::Fatal(anyhow::anyhow!("request too large to frame")))?;
        self.stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
        self.stream
            .write_all(&encoded)
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;

        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_BYTES {
            return Err(SyncError::Fatal(anyhow::anyhow!(
                "response of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte limit"
            )));
        }

        let mut body = vec![0u8; len as usize];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;

        serde_json::from_slice(&body).map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))
    }
}
