//! Event Logger - persists bridge events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes every event to a
//! per-session JSONL file. Surface hook events, which have no session, go
//! to a shared `bridge` log.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{BridgeEvent, EventLogEntry};

/// Log key for events that belong to no session
const BRIDGE_LOG: &str = "bridge";

/// Event logger that writes events to JSONL files
///
/// Events are written to `{logs_dir}/{session-id}/events.jsonl`
pub struct EventLogger {
    logs_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        let logs_dir = logs_dir.as_ref().to_path_buf();
        debug!(?logs_dir, "EventLogger::new: creating logger");
        Self {
            logs_dir,
            writers: HashMap::new(),
        }
    }

    /// Write an event to its session's log file
    pub fn write_event(&mut self, event: &BridgeEvent) -> eyre::Result<()> {
        let key = event.session_id().unwrap_or(BRIDGE_LOG).to_string();
        debug!(%key, event_name = event.name(), "EventLogger::write_event");

        if !self.writers.contains_key(&key) {
            let dir = self.logs_dir.join(&key);
            fs::create_dir_all(&dir)?;

            let log_path = dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(key.clone(), BufWriter::new(file));
        }

        let Some(writer) = self.writers.get_mut(&key) else {
            eyre::bail!("writer for {} missing after open", key);
        };

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for a session (after it is destroyed)
    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session_id) {
            let _ = writer.flush();
        }
    }

    /// Run the logger, consuming events from the bus until it closes
    pub async fn run(mut self, mut rx: broadcast::Receiver<BridgeEvent>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let closing = match &event {
                        BridgeEvent::SessionDestroyed { session_id, .. } => Some(session_id.clone()),
                        _ => None,
                    };

                    if let Err(e) = self.write_event(&event) {
                        error!(event_name = event.name(), error = %e, "EventLogger: failed to write event");
                    }

                    if let Some(session_id) = closing {
                        self.close_session(&session_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (key, mut writer) in self.writers.drain() {
            debug!(%key, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events from a session's log file
pub fn read_session_events(logs_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = logs_dir.as_ref().join(session_id).join("events.jsonl");
    debug!(?log_path, "read_session_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_session_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_session_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task writing under `logs_dir`
pub fn spawn_event_logger(event_bus: Arc<EventBus>, logs_dir: impl AsRef<Path>) -> eyre::Result<tokio::task::JoinHandle<()>> {
    fs::create_dir_all(logs_dir.as_ref())?;
    let logger = EventLogger::new(logs_dir);
    let rx = event_bus.subscribe();
    Ok(tokio::spawn(async move {
        logger.run(rx).await;
    }))
}
