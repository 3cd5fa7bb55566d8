//! Observer event types
//!
//! These events are the bridge's outward notifications:
//! - Session lifecycle (created, destroyed, recovered, failed)
//! - Traffic (event sent, inbound event, subscriber notified)
//! - Surface hooks (view loaded, view ready)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Envelope, SurfaceRef};

/// Core event enum - the vocabulary of bridge activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeEvent {
    // === Session lifecycle ===
    SessionCreated {
        session_id: String,
        target: SurfaceRef,
        module: String,
    },
    SessionDestroyed {
        session_id: String,
        reason: String,
    },
    SessionRecovered {
        session_id: String,
        attempts: u32,
    },
    /// Session reached `permanently_failed`
    SessionFailed {
        session_id: String,
        reason: String,
        attempts: u32,
    },
    /// Recovery needs the user (blocked popup, denied permission)
    PermissionRequired {
        session_id: String,
        message: String,
    },

    // === Traffic ===
    EventSent {
        session_id: String,
        envelope: Envelope,
    },
    InboundEvent {
        session_id: String,
        envelope: Envelope,
    },
    /// One (event, subscriber) pair was notified
    SubscriberNotified {
        session_id: String,
        subscriber_id: String,
        event_name: String,
        data: Value,
    },

    // === Surface hooks ===
    BrowserViewLoaded {
        target: SurfaceRef,
    },
    BrowserViewReady {
        target: SurfaceRef,
    },
}

impl BridgeEvent {
    /// Observer name of this event (`session-created`, `event-sent`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::SessionCreated { .. } => "session-created",
            BridgeEvent::SessionDestroyed { .. } => "session-destroyed",
            BridgeEvent::SessionRecovered { .. } => "session-recovered",
            BridgeEvent::SessionFailed { .. } => "session-failed",
            BridgeEvent::PermissionRequired { .. } => "permission-required",
            BridgeEvent::EventSent { .. } => "event-sent",
            BridgeEvent::InboundEvent { .. } => "inbound-event",
            BridgeEvent::SubscriberNotified { .. } => "subscriber-notified",
            BridgeEvent::BrowserViewLoaded { .. } => "browser-view-loaded",
            BridgeEvent::BrowserViewReady { .. } => "browser-view-ready",
        }
    }

    /// Session this event belongs to; surface hooks have none
    pub fn session_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::SessionCreated { session_id, .. }
            | BridgeEvent::SessionDestroyed { session_id, .. }
            | BridgeEvent::SessionRecovered { session_id, .. }
            | BridgeEvent::SessionFailed { session_id, .. }
            | BridgeEvent::PermissionRequired { session_id, .. }
            | BridgeEvent::EventSent { session_id, .. }
            | BridgeEvent::InboundEvent { session_id, .. }
            | BridgeEvent::SubscriberNotified { session_id, .. } => Some(session_id),
            BridgeEvent::BrowserViewLoaded { .. } | BridgeEvent::BrowserViewReady { .. } => None,
        }
    }
}

/// Wrapper for JSONL logging with timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: BridgeEvent,
}

impl EventLogEntry {
    pub fn new(event: BridgeEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvelopeKind;
    use serde_json::json;

    #[test]
    fn test_event_names_match_wire_tag() {
        let events = vec![
            BridgeEvent::SessionCreated {
                session_id: "s".to_string(),
                target: SurfaceRef::from("v1"),
                module: "writing".to_string(),
            },
            BridgeEvent::SessionDestroyed {
                session_id: "s".to_string(),
                reason: "manual".to_string(),
            },
            BridgeEvent::SessionFailed {
                session_id: "s".to_string(),
                reason: "retries exhausted".to_string(),
                attempts: 3,
            },
            BridgeEvent::BrowserViewReady {
                target: SurfaceRef::from("v1"),
            },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.name());
        }
    }

    #[test]
    fn test_session_id() {
        let sent = BridgeEvent::EventSent {
            session_id: "s1".to_string(),
            envelope: Envelope::outbound(EnvelopeKind::Event, "s1", "x", json!({"a": 1})),
        };
        assert_eq!(sent.session_id(), Some("s1"));

        let loaded = BridgeEvent::BrowserViewLoaded {
            target: SurfaceRef::from("v1"),
        };
        assert_eq!(loaded.session_id(), None);
    }

    #[test]
    fn test_log_entry_roundtrip() {
        let entry = EventLogEntry::new(BridgeEvent::SessionRecovered {
            session_id: "s1".to_string(),
            attempts: 2,
        });
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("\"ts\""));
        assert!(line.contains("session-recovered"));

        let parsed: EventLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.event.name(), "session-recovered");
    }
}
