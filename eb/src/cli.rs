//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// EventBridge - session-scoped event bridge for embedded legacy surfaces
#[derive(Parser)]
#[command(
    name = "eb",
    about = "Session-scoped event bridge between a host controller and embedded legacy UI surfaces",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the IPC socket path
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge in the foreground and serve IPC requests
    Serve {
        /// Do not start the heartbeat timer
        #[arg(long)]
        no_heartbeat: bool,
    },

    /// Check that a bridge is serving
    Ping,

    /// Ask a serving bridge to shut down
    Stop,

    /// Manage sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Send an event to one session
    Send {
        session_id: String,
        event_name: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Send an event to every active session
    Broadcast {
        event_name: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Subscribe (or unsubscribe) a subscriber to a session event
    Subscribe {
        session_id: String,
        event_name: String,
        subscriber_id: String,

        /// Remove the subscription instead
        #[arg(long)]
        remove: bool,
    },

    /// Execute a command on a session's surface
    Command {
        session_id: String,
        command: String,

        /// JSON arguments
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Store a value and push it to the surface
    Sync {
        session_id: String,
        key: String,

        /// JSON value
        value: String,
    },

    /// Show bridge statistics
    Stats {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run an in-process simulation against a lossy loopback surface
    Simulate {
        /// Number of sessions
        #[arg(short, long, default_value = "3")]
        sessions: usize,

        /// Events sent to each session
        #[arg(short, long, default_value = "10")]
        events: usize,

        /// Probability a send is dropped (0.0 - 1.0)
        #[arg(long, default_value = "0.2")]
        fail_rate: f64,

        /// Close one surface halfway through
        #[arg(long)]
        close_surface: bool,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Create a session
    Create {
        /// Session id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Target surface
        #[arg(short, long)]
        target: Option<String>,

        #[arg(short, long)]
        module: Option<String>,

        #[arg(short, long)]
        user: Option<String>,
    },

    /// List sessions
    List {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one session
    Get {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Destroy a session
    Destroy { id: String },
}

/// Output format for listing commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Location of the bridge log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eventbridge")
        .join("logs")
        .join("eventbridge.log")
}

/// Parse a JSON argument, accepting bare words as strings
pub fn parse_json_arg(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
