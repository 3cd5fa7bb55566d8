//! Session persistence
//!
//! Session metadata is kept as one JSON object per line in
//! `<storage-dir>/sessions.jsonl`. Pending queues are never persisted.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::domain::{SessionInfo, SessionOptions, SurfaceRef};
use crate::error::{BridgeError, BridgeResult};

const SESSIONS_FILE: &str = "sessions.jsonl";

/// Persisted form of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub view_id: SurfaceRef,
    pub created_at: DateTime<Utc>,
    pub module: String,
    pub config: SessionConfig,
}

impl PersistedSession {
    /// Options that recreate this session in a registry
    pub fn to_options(&self) -> SessionOptions {
        SessionOptions::for_target(self.view_id.clone())
            .with_id(self.id.clone())
            .with_module(self.module.clone())
            .with_config(self.config.clone())
    }
}

impl From<&SessionInfo> for PersistedSession {
    fn from(info: &SessionInfo) -> Self {
        Self {
            id: info.id.clone(),
            view_id: info.target.clone(),
            created_at: info.created_at,
            module: info.module.clone(),
            config: info.config.clone(),
        }
    }
}

/// JSONL store for session metadata
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> BridgeResult<Self> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "SessionStore::open: called");
        fs::create_dir_all(dir).map_err(|e| persistence(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self {
            path: dir.join(SESSIONS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record with the same id
    pub fn save(&self, session: &PersistedSession) -> BridgeResult<()> {
        debug!(session_id = %session.id, "SessionStore::save: called");
        let mut records = self.load_all()?;
        match records.iter_mut().find(|r| r.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => records.push(session.clone()),
        }
        self.write_all(&records)
    }

    /// Remove a record; returns whether it existed
    pub fn remove(&self, id: &str) -> BridgeResult<bool> {
        debug!(session_id = %id, "SessionStore::remove: called");
        let mut records = self.load_all()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records)?;
        Ok(true)
    }

    /// Read every record; malformed lines are skipped
    pub fn load_all(&self) -> BridgeResult<Vec<PersistedSession>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).map_err(|e| persistence(format!("open {}: {}", self.path.display(), e)))?;
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| persistence(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PersistedSession>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = index + 1, error = %e, "SessionStore: skipping malformed record"),
            }
        }
        Ok(records)
    }

    fn write_all(&self, records: &[PersistedSession]) -> BridgeResult<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut file = File::create(&tmp).map_err(|e| persistence(format!("create {}: {}", tmp.display(), e)))?;
        for record in records {
            let json = serde_json::to_string(record).map_err(|e| persistence(e.to_string()))?;
            writeln!(file, "{}", json).map_err(|e| persistence(e.to_string()))?;
        }
        file.sync_all().map_err(|e| persistence(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| persistence(e.to_string()))?;
        info!(count = records.len(), path = %self.path.display(), "Persisted sessions");
        Ok(())
    }
}

fn persistence(message: String) -> BridgeError {
    BridgeError::Persistence(message)
}
