//! IPC server
//!
//! Accepts connections on the bridge socket and answers one response line
//! per request line. Connections are served on their own tasks.

use std::path::PathBuf;

use eyre::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::MAX_MESSAGE_SIZE;
use super::messages::{ApiResponse, BridgeRequest};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};

/// Create a listener at `socket_path`, replacing any stale socket file
pub fn create_listener_at(socket_path: &PathBuf) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener_at: socket bound");

    Ok((listener, socket_path.clone()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &PathBuf) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Serves bridge requests from a Unix socket
pub struct BridgeServer {
    bridge: Bridge,
    listener: UnixListener,
    /// Signalled when a client asks the process to stop
    shutdown_tx: mpsc::Sender<()>,
}

impl BridgeServer {
    pub fn new(bridge: Bridge, listener: UnixListener, shutdown_tx: mpsc::Sender<()>) -> Self {
        Self {
            bridge,
            listener,
            shutdown_tx,
        }
    }

    /// Accept connections until `stop_rx` fires
    pub async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        info!("BridgeServer listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            debug!("BridgeServer: connection accepted");
                            let bridge = self.bridge.clone();
                            let shutdown_tx = self.shutdown_tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(bridge, stream, shutdown_tx).await {
                                    warn!(error = %e, "BridgeServer: connection error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "BridgeServer: accept error"),
                    }
                }
                _ = stop_rx.recv() => {
                    debug!("BridgeServer: stop signal received");
                    break;
                }
            }
        }
        info!("BridgeServer stopped");
    }
}

async fn serve_connection(bridge: Bridge, stream: UnixStream, shutdown_tx: mpsc::Sender<()>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        line.clear();
        // One byte past the cap is enough to tell an oversized request apart
        let bytes_read = (&mut reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .context("Failed to read IPC request")?;
        if bytes_read == 0 {
            debug!("serve_connection: client closed");
            return Ok(());
        }
        if bytes_read > MAX_MESSAGE_SIZE {
            warn!(limit = MAX_MESSAGE_SIZE, "serve_connection: request too large, closing");
            send_response(
                &mut write_half,
                &ApiResponse::error(format!("Message too large: exceeds {} bytes", MAX_MESSAGE_SIZE)),
            )
            .await?;
            return Ok(());
        }
        let request = line.trim_ascii();
        if request.is_empty() {
            continue;
        }

        let response = match serde_json::from_slice::<BridgeRequest>(request) {
            Ok(BridgeRequest::Shutdown) => {
                info!("Shutdown requested over IPC");
                send_response(&mut write_half, &ApiResponse::empty()).await?;
                let _ = shutdown_tx.send(()).await;
                return Ok(());
            }
            Ok(request) => handle_request(&bridge, request).await,
            Err(e) => ApiResponse::error(format!("Invalid request: {}", e)),
        };
        send_response(&mut write_half, &response).await?;
    }
}

/// Answer one request against the bridge
pub async fn handle_request(bridge: &Bridge, request: BridgeRequest) -> ApiResponse {
    let name = request.name();
    debug!(request = name, "handle_request: called");
    match execute(bridge, request).await {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => {
            debug!(request = name, error = %e, "handle_request: failed");
            ApiResponse::error(e.to_string())
        }
    }
}

async fn execute(bridge: &Bridge, request: BridgeRequest) -> BridgeResult<Value> {
    let data = match request {
        BridgeRequest::SessionCreate { options } => to_json(&bridge.create_session(options).await?),
        BridgeRequest::SessionDestroy { session_id } => {
            json!({ "destroyed": bridge.destroy_session(&session_id).await? })
        }
        BridgeRequest::SessionGet { session_id } => match bridge.get_session(&session_id).await? {
            Some(info) => to_json(&info),
            None => return Err(BridgeError::SessionNotFound(session_id)),
        },
        BridgeRequest::SessionList => to_json(&bridge.get_all_sessions().await?),
        BridgeRequest::EventSend {
            session_id,
            event_name,
            data,
        } => to_json(&bridge.send_event(&session_id, &event_name, data).await?),
        BridgeRequest::EventBroadcast { event_name, data } => {
            json!({ "delivered": bridge.broadcast_event(&event_name, data).await })
        }
        BridgeRequest::EventSubscribe {
            session_id,
            event_name,
            subscriber_id,
        } => json!({ "subscribed": bridge.subscribe(&session_id, &event_name, &subscriber_id).await? }),
        BridgeRequest::EventUnsubscribe {
            session_id,
            event_name,
            subscriber_id,
        } => json!({ "unsubscribed": bridge.unsubscribe(&session_id, &event_name, &subscriber_id).await? }),
        BridgeRequest::CommandExecute {
            session_id,
            command,
            args,
        } => to_json(&bridge.execute_command(&session_id, &command, args).await?),
        BridgeRequest::SyncData { session_id, key, value } => {
            to_json(&bridge.sync_data(&session_id, &key, value).await?)
        }
        BridgeRequest::Stats => to_json(&bridge.stats().await?),
        BridgeRequest::Ping => json!({ "version": env!("CARGO_PKG_VERSION") }),
        BridgeRequest::Shutdown => {
            bridge.shutdown().await?;
            Value::Null
        }
    };
    Ok(data)
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

async fn send_response(stream: &mut OwnedWriteHalf, response: &ApiResponse) -> Result<()> {
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(success = response.success, "send_response: sent response");
    Ok(())
}
