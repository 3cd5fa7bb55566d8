//! Bridge error types and failure classification

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SessionStatus;

/// Result alias used across the bridge library
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Interceptor for '{event_name}' failed: {message}")]
    Interceptor { event_name: String, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {id} is not active (status: {status})")]
    SessionNotActive { id: String, status: SessionStatus },

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("Session registry channel closed")]
    Channel,

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl BridgeError {
    /// Check if the recovery coordinator may retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Transport(e) => e.is_retryable(),
            BridgeError::Timeout(_) => true,
            BridgeError::Validation(_)
            | BridgeError::Permission(_)
            | BridgeError::Interceptor { .. }
            | BridgeError::SessionNotFound(_)
            | BridgeError::SessionNotActive { .. }
            | BridgeError::InvalidTransition { .. }
            | BridgeError::Channel
            | BridgeError::Persistence(_) => false,
        }
    }

    /// Check if this error needs the user to act before anything can succeed
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            BridgeError::Permission(_) | BridgeError::Transport(TransportError::PermissionDenied(_))
        )
    }
}

/// Errors reported by a transport adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Surface disconnected: {0}")]
    Disconnected(String),

    #[error("Surface closed")]
    SurfaceClosed,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::PermissionDenied(_))
    }

    /// Map a transport error onto a recovery classification
    pub fn classify(&self) -> FailureKind {
        match self {
            TransportError::PermissionDenied(_) => FailureKind::PermissionDenied,
            TransportError::SurfaceClosed => FailureKind::SurfaceClosed,
            TransportError::Timeout => FailureKind::MessageTimeout,
            TransportError::Disconnected(_) | TransportError::Other(_) => FailureKind::MessageSendFailed,
        }
    }
}

/// Classification of a delivery or liveness failure
///
/// Each classification selects a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Heartbeat window elapsed without activity
    ConnectionLost,
    /// A send did not complete before its deadline
    MessageTimeout,
    /// The adapter rejected or failed a send
    MessageSendFailed,
    /// The target surface no longer exists
    SurfaceClosed,
    /// Surface creation or delivery was blocked
    PermissionDenied,
}

impl FailureKind {
    /// Whether automatic recovery may be attempted
    pub fn is_recoverable(self) -> bool {
        !matches!(self, FailureKind::PermissionDenied)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ConnectionLost => "connection_lost",
            FailureKind::MessageTimeout => "message_timeout",
            FailureKind::MessageSendFailed => "message_send_failed",
            FailureKind::SurfaceClosed => "surface_closed",
            FailureKind::PermissionDenied => "permission_denied",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert_eq!(
            TransportError::PermissionDenied("popup blocked".to_string()).classify(),
            FailureKind::PermissionDenied
        );
        assert_eq!(TransportError::SurfaceClosed.classify(), FailureKind::SurfaceClosed);
        assert_eq!(TransportError::Timeout.classify(), FailureKind::MessageTimeout);
        assert_eq!(
            TransportError::Disconnected("pipe".to_string()).classify(),
            FailureKind::MessageSendFailed
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(BridgeError::Transport(TransportError::Timeout).is_retryable());
        assert!(BridgeError::Timeout(Duration::from_secs(3)).is_retryable());
        assert!(!BridgeError::Validation("no target".to_string()).is_retryable());
        assert!(!BridgeError::Transport(TransportError::PermissionDenied("blocked".to_string())).is_retryable());
        assert!(
            !BridgeError::Interceptor {
                event_name: "x".to_string(),
                message: "boom".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_requires_user_action() {
        assert!(BridgeError::Permission("blocked".to_string()).requires_user_action());
        assert!(BridgeError::Transport(TransportError::PermissionDenied("blocked".to_string())).requires_user_action());
        assert!(!BridgeError::Timeout(Duration::from_secs(1)).requires_user_action());
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::ConnectionLost).unwrap();
        assert_eq!(json, r#""connection_lost""#);
        assert_eq!(FailureKind::SurfaceClosed.to_string(), "surface_closed");
        assert!(!FailureKind::PermissionDenied.is_recoverable());
        assert!(FailureKind::MessageTimeout.is_recoverable());
    }
}
