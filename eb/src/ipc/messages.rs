//! IPC message types
//!
//! Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::SessionOptions;

/// Requests from a client to the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeRequest {
    SessionCreate {
        #[serde(default)]
        options: SessionOptions,
    },
    SessionDestroy {
        session_id: String,
    },
    SessionGet {
        session_id: String,
    },
    SessionList,
    EventSend {
        session_id: String,
        event_name: String,
        #[serde(default)]
        data: Value,
    },
    EventBroadcast {
        event_name: String,
        #[serde(default)]
        data: Value,
    },
    EventSubscribe {
        session_id: String,
        event_name: String,
        subscriber_id: String,
    },
    EventUnsubscribe {
        session_id: String,
        event_name: String,
        subscriber_id: String,
    },
    CommandExecute {
        session_id: String,
        command: String,
        #[serde(default)]
        args: Value,
    },
    SyncData {
        session_id: String,
        key: String,
        value: Value,
    },
    Stats,
    Ping,
    Shutdown,
}

impl BridgeRequest {
    /// Wire name, e.g. `session-create`
    pub fn name(&self) -> &'static str {
        match self {
            BridgeRequest::SessionCreate { .. } => "session-create",
            BridgeRequest::SessionDestroy { .. } => "session-destroy",
            BridgeRequest::SessionGet { .. } => "session-get",
            BridgeRequest::SessionList => "session-list",
            BridgeRequest::EventSend { .. } => "event-send",
            BridgeRequest::EventBroadcast { .. } => "event-broadcast",
            BridgeRequest::EventSubscribe { .. } => "event-subscribe",
            BridgeRequest::EventUnsubscribe { .. } => "event-unsubscribe",
            BridgeRequest::CommandExecute { .. } => "command-execute",
            BridgeRequest::SyncData { .. } => "sync-data",
            BridgeRequest::Stats => "stats",
            BridgeRequest::Ping => "ping",
            BridgeRequest::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

/// Response envelope for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                message: message.into(),
            }),
        }
    }
}
