//! EventBridge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// Main EventBridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults applied to every new session
    pub session: SessionConfig,

    /// Recovery policy and strategy deadlines
    pub recovery: RecoveryConfig,

    /// Dispatcher settings
    pub dispatch: DispatchConfig,

    /// Session persistence
    pub storage: StorageConfig,

    /// IPC socket settings
    pub ipc: IpcConfig,

    /// Script injected into surfaces when they report DOM-ready
    #[serde(rename = "bootstrap-path")]
    pub bootstrap_path: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .eventbridge.yml
        let local_config = PathBuf::from(".eventbridge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/eventbridge/eventbridge.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Reject values that would stall or panic the runtime
    pub fn validate(&self) -> BridgeResult<()> {
        self.session.validate()?;
        if self.recovery.ready_poll_ms == 0 {
            return Err(BridgeError::Validation("recovery.ready-poll-ms must be non-zero".to_string()));
        }
        if self.dispatch.event_channel_capacity == 0 {
            return Err(BridgeError::Validation(
                "dispatch.event-channel-capacity must be non-zero".to_string(),
            ));
        }
        if self.dispatch.registry_channel_buffer == 0 {
            return Err(BridgeError::Validation(
                "dispatch.registry-channel-buffer must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Read only the log level, before logging is initialised
    ///
    /// Errors are swallowed; the full load later reports them.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".eventbridge.yml")];
                paths.extend(Self::user_config_path());
                paths
            }
        };

        candidates
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(&p).ok())
            .and_then(|c| c.log_level)
    }

    /// Read the bootstrap source, if a path is configured
    pub fn load_bootstrap(&self) -> Result<Option<String>> {
        debug!(bootstrap_path = ?self.bootstrap_path, "Config::load_bootstrap: called");
        let Some(path) = &self.bootstrap_path else {
            return Ok(None);
        };
        let source =
            fs::read_to_string(path).context(format!("Failed to read bootstrap source {}", path.display()))?;
        Ok(Some(source))
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("eventbridge").join("eventbridge.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("Invalid config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Per-session settings
///
/// These are the defaults for new sessions; a session may carry its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Silence after which the sweep destroys the session
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Heartbeat period; two missed periods mean the connection is lost
    #[serde(rename = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: u64,

    /// Upper bound on undelivered envelopes kept for replay
    #[serde(rename = "max-queue-size")]
    pub max_queue_size: usize,

    /// Save session metadata so it survives restarts
    pub persistence: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            heartbeat_interval_ms: 5_000,
            max_queue_size: 100,
            persistence: true,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence that counts as a lost connection (two heartbeat periods)
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_mul(2))
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(BridgeError::Validation("heartbeat-interval-ms must be non-zero".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(BridgeError::Validation("timeout-ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Recovery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts before a session is permanently failed
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt k waits base × k
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay
    #[serde(rename = "backoff-cap-ms")]
    pub backoff_cap_ms: u64,

    /// Deadline for the reconnect handshake
    #[serde(rename = "handshake-timeout-ms")]
    pub handshake_timeout_ms: u64,

    /// Queued envelopes older than this are dropped on replay
    #[serde(rename = "stale-after-ms")]
    pub stale_after_ms: u64,

    /// Deadline for a recreated surface to report alive
    #[serde(rename = "surface-ready-timeout-ms")]
    pub surface_ready_timeout_ms: u64,

    /// Poll period while waiting for a recreated surface
    #[serde(rename = "ready-poll-ms")]
    pub ready_poll_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 10_000,
            handshake_timeout_ms: 3_000,
            stale_after_ms: 30_000,
            surface_ready_timeout_ms: 10_000,
            ready_poll_ms: 500,
        }
    }
}

impl RecoveryConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn surface_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for a single transport send
    #[serde(rename = "send-timeout-ms")]
    pub send_timeout_ms: u64,

    /// Buffer of the observer broadcast stream
    #[serde(rename = "event-channel-capacity")]
    pub event_channel_capacity: usize,

    /// Buffer of the registry request channel
    #[serde(rename = "registry-channel-buffer")]
    pub registry_channel_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5_000,
            event_channel_capacity: 1024,
            registry_channel_buffer: 256,
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for persisted sessions and event logs
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("eventbridge"),
        }
    }
}

/// IPC configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path; defaults to the runtime directory
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,
}
