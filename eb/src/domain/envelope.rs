//! Envelope - the unit of data carried across the bridge

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::generate_id;

/// Source tag for envelopes built by the host controller
pub const HOST_SOURCE: &str = "main-app";

/// Source tag for envelopes that arrived from a surface
pub const SURFACE_SOURCE: &str = "legacy-app";

/// Event name used for heartbeat probes
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Event name used for the reconnect handshake
pub const RECONNECT_EVENT: &str = "reconnect:request";

/// What an envelope carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Event,
    Command,
    Heartbeat,
    Handshake,
}

impl EnvelopeKind {
    fn id_prefix(self) -> &'static str {
        match self {
            EnvelopeKind::Event => "event",
            EnvelopeKind::Command => "cmd",
            EnvelopeKind::Heartbeat => "hb",
            EnvelopeKind::Handshake => "hs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Wrapped unit of data transmitted between host and surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub kind: EnvelopeKind,
    pub event_name: String,
    pub payload: Value,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub direction: Direction,
    pub source: String,
}

impl Envelope {
    /// Build an outbound envelope with a fresh id
    pub fn outbound(kind: EnvelopeKind, session_id: &str, event_name: &str, payload: Value) -> Self {
        Self {
            id: generate_id(kind.id_prefix()),
            kind,
            event_name: event_name.to_string(),
            payload,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            direction: Direction::Outbound,
            source: HOST_SOURCE.to_string(),
        }
    }

    /// Build an envelope for an event arriving from a surface
    pub fn inbound(session_id: &str, event_name: &str, payload: Value) -> Self {
        Self {
            id: generate_id("in"),
            kind: EnvelopeKind::Event,
            event_name: event_name.to_string(),
            payload,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            direction: Direction::Inbound,
            source: SURFACE_SOURCE.to_string(),
        }
    }

    /// Age of the envelope relative to `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the envelope is older than `window`
    pub fn is_stale(&self, window: Duration) -> bool {
        self.age_at(Utc::now()) > window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_envelope() {
        let env = Envelope::outbound(EnvelopeKind::Event, "session-1", "x", json!({"a": 1}));
        assert!(env.id.starts_with("event-"));
        assert_eq!(env.direction, Direction::Outbound);
        assert_eq!(env.source, HOST_SOURCE);
        assert_eq!(env.payload["a"], 1);

        let cmd = Envelope::outbound(EnvelopeKind::Command, "session-1", "reload", Value::Null);
        assert!(cmd.id.starts_with("cmd-"));
    }

    #[test]
    fn test_inbound_envelope() {
        let env = Envelope::inbound("session-1", "essay:submitted", json!({"words": 250}));
        assert_eq!(env.direction, Direction::Inbound);
        assert_eq!(env.source, SURFACE_SOURCE);
    }

    #[test]
    fn test_staleness() {
        let mut env = Envelope::outbound(EnvelopeKind::Event, "s", "x", Value::Null);
        assert!(!env.is_stale(Duration::from_secs(30)));

        env.created_at = Utc::now() - chrono::Duration::seconds(31);
        assert!(env.is_stale(Duration::from_secs(30)));
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let mut env = Envelope::outbound(EnvelopeKind::Event, "s", "x", Value::Null);
        env.created_at = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(env.age_at(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_serialization() {
        let env = Envelope::outbound(EnvelopeKind::Heartbeat, "s", HEARTBEAT_EVENT, Value::Null);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["kind"], "heartbeat");
        assert_eq!(json["direction"], "outbound");
    }
}
