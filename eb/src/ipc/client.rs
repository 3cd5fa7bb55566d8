//! IPC client for a running bridge

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::messages::{ApiResponse, BridgeRequest};
use super::{MAX_MESSAGE_SIZE, get_socket_path};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for talking to `eb serve`
#[derive(Debug, Clone)]
pub struct BridgeClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for BridgeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeClient {
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check the bridge is up and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("BridgeClient: pinging bridge");
        let data = self.call(BridgeRequest::Ping).await?;
        data.get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| eyre::eyre!("Unexpected response"))
    }

    /// Ask the serving process to stop
    pub async fn shutdown(&self) -> Result<()> {
        debug!("BridgeClient: requesting shutdown");
        self.call(BridgeRequest::Shutdown).await.map(|_| ())
    }

    /// Send a request; an unsuccessful response becomes an error
    pub async fn call(&self, request: BridgeRequest) -> Result<Value> {
        let response = self.request(request).await?;
        if response.success {
            return Ok(response.data.unwrap_or(Value::Null));
        }
        let message = response
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string());
        Err(eyre::eyre!("Bridge error: {}", message))
    }

    /// Send a request and return the raw response
    pub async fn request(&self, request: BridgeRequest) -> Result<ApiResponse> {
        debug!(socket_path = ?self.socket_path, request = request.name(), "BridgeClient: sending request");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to bridge socket")?;

        self.send_on_stream(stream, &request).await
    }

    async fn send_on_stream(&self, mut stream: UnixStream, request: &BridgeRequest) -> Result<ApiResponse> {
        let request_json = serde_json::to_string(request).context("Failed to serialize request")?;
        if request_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", request_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(request_json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream).take(MAX_MESSAGE_SIZE as u64 + 1);
        let mut response_line = Vec::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_until(b'\n', &mut response_line)
                .await
                .context("Failed to read response")?;
            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: exceeds {} bytes", MAX_MESSAGE_SIZE));
            }
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: ApiResponse =
            serde_json::from_slice(response_line.trim_ascii()).context("Failed to parse bridge response")?;
        debug!(success = response.success, "BridgeClient: received response");
        Ok(response)
    }
}
