//! Inter-process access to a running bridge
//!
//! Newline-delimited JSON over a Unix Domain Socket. Each request is one line
//! tagged by `type`; each response is one `{success, data?, error?}` line.

use std::path::PathBuf;

use crate::config::IpcConfig;

pub mod client;
pub mod messages;
pub mod server;

pub use client::BridgeClient;
pub use messages::{ApiError, ApiResponse, BridgeRequest};
pub use server::{BridgeServer, cleanup_socket, create_listener_at};

/// Maximum size of one request or response line
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default socket path, under the runtime directory
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("eventbridge")
        .join("bridge.sock")
}

/// Configured socket path, or the default
pub fn socket_path(config: &IpcConfig) -> PathBuf {
    config.socket_path.clone().unwrap_or_else(get_socket_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_ends_with_bridge_sock() {
        assert!(get_socket_path().ends_with("eventbridge/bridge.sock"));
    }

    #[test]
    fn test_configured_socket_path_wins() {
        let config = IpcConfig {
            socket_path: Some(PathBuf::from("/tmp/custom.sock")),
        };
        assert_eq!(socket_path(&config), PathBuf::from("/tmp/custom.sock"));
        assert_eq!(socket_path(&IpcConfig::default()), get_socket_path());
    }
}
