//! EventBridge CLI
//!
//! `eb serve` hosts a bridge and answers IPC requests; every other command
//! is a client of that socket, except `simulate` and `config`.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use eventbridge::bridge::Bridge;
use eventbridge::cli::{Cli, Command, OutputFormat, SessionCommand, parse_json_arg};
use eventbridge::config::Config;
use eventbridge::domain::SessionOptions;
use eventbridge::events::spawn_event_logger;
use eventbridge::ipc::{self, BridgeClient, BridgeRequest, BridgeServer};
use eventbridge::persistence::SessionStore;
use eventbridge::sim::{SimulationOptions, SimulationReport, run_simulation};
use eventbridge::transport::LoopbackTransport;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = eventbridge::cli::get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let socket_path = cli.socket.clone().unwrap_or_else(|| ipc::socket_path(&config.ipc));
    let client = BridgeClient::with_socket_path(socket_path.clone());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { no_heartbeat } => cmd_serve(config, socket_path, no_heartbeat).await,
        Command::Ping => cmd_ping(&client).await,
        Command::Stop => cmd_stop(&client).await,
        Command::Session { command } => cmd_session(&client, command).await,
        Command::Send {
            session_id,
            event_name,
            data,
        } => {
            let request = BridgeRequest::EventSend {
                session_id,
                event_name,
                data: parse_json_arg(&data),
            };
            print_outcome(client.call(request).await?);
            Ok(())
        }
        Command::Broadcast { event_name, data } => {
            let request = BridgeRequest::EventBroadcast {
                event_name: event_name.clone(),
                data: parse_json_arg(&data),
            };
            let result = client.call(request).await?;
            println!(
                "Broadcast '{}' delivered to {} session(s)",
                event_name,
                result["delivered"].as_u64().unwrap_or(0)
            );
            Ok(())
        }
        Command::Subscribe {
            session_id,
            event_name,
            subscriber_id,
            remove,
        } => {
            let request = if remove {
                BridgeRequest::EventUnsubscribe {
                    session_id,
                    event_name,
                    subscriber_id,
                }
            } else {
                BridgeRequest::EventSubscribe {
                    session_id,
                    event_name,
                    subscriber_id,
                }
            };
            let result = client.call(request).await?;
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Command::Command {
            session_id,
            command,
            args,
        } => {
            let request = BridgeRequest::CommandExecute {
                session_id,
                command,
                args: parse_json_arg(&args),
            };
            print_outcome(client.call(request).await?);
            Ok(())
        }
        Command::Sync { session_id, key, value } => {
            let request = BridgeRequest::SyncData {
                session_id,
                key,
                value: parse_json_arg(&value),
            };
            print_outcome(client.call(request).await?);
            Ok(())
        }
        Command::Stats { format } => cmd_stats(&client, format).await,
        Command::Simulate {
            sessions,
            events,
            fail_rate,
            close_surface,
            format,
        } => {
            let options = SimulationOptions {
                sessions,
                events_per_session: events,
                fail_rate: fail_rate.clamp(0.0, 1.0),
                close_surface,
                ..Default::default()
            };
            cmd_simulate(options, format).await
        }
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config).context("Failed to render config")?);
            Ok(())
        }
    }
}

/// Host a bridge until SIGINT, SIGTERM or an IPC shutdown request
async fn cmd_serve(config: Config, socket_path: PathBuf, no_heartbeat: bool) -> Result<()> {
    debug!(?socket_path, no_heartbeat, "cmd_serve: called");

    let transport = Arc::new(LoopbackTransport::new());
    let mut builder = Bridge::builder(config.clone(), transport);
    if config.session.persistence {
        let store = SessionStore::open(&config.storage.dir).context("Failed to open session store")?;
        builder = builder.store(store);
    }
    if let Some(source) = config.load_bootstrap()? {
        builder = builder.bootstrap(source);
    }
    let bridge = builder.spawn();

    let logger = spawn_event_logger(bridge.bus().clone(), config.storage.dir.join("events"))?;

    let restored = bridge.initialize().await.context("Failed to initialize bridge")?;
    if no_heartbeat {
        bridge.stop_heartbeat().await;
    }
    info!(restored, "Bridge initialized");

    let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
    info!(?socket_path, "IPC socket listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (stop_tx, stop_rx) = tokio::sync::mpsc::channel::<()>(1);
    let server = tokio::spawn(BridgeServer::new(bridge.clone(), listener, shutdown_tx).run(stop_rx));

    println!("EventBridge serving on {}", socket_path.display());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
            _ = shutdown_rx.recv() => info!("Shutdown requested"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Ctrl+C received"),
            _ = shutdown_rx.recv() => info!("Shutdown requested"),
        }
    }

    info!("Bridge shutting down...");
    let _ = stop_tx.send(()).await;
    let _ = server.await;

    bridge.shutdown().await.context("Bridge shutdown failed")?;
    logger.abort();

    ipc::cleanup_socket(&socket_path);
    println!("EventBridge stopped");
    Ok(())
}

async fn cmd_ping(client: &BridgeClient) -> Result<()> {
    debug!("cmd_ping: called");
    if !client.socket_exists() {
        println!("EventBridge is not running");
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("EventBridge is alive and responsive");
            println!("Version: {}", version);
        }
        Err(e) => {
            println!("EventBridge socket exists but is not responding");
            println!("Error: {}", e);
        }
    }
    Ok(())
}

async fn cmd_stop(client: &BridgeClient) -> Result<()> {
    debug!("cmd_stop: called");
    if !client.socket_exists() {
        println!("EventBridge is not running");
        return Ok(());
    }
    client.shutdown().await.context("Failed to stop bridge")?;
    println!("EventBridge stopping");
    Ok(())
}

async fn cmd_session(client: &BridgeClient, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Create {
            id,
            target,
            module,
            user,
        } => {
            let options = SessionOptions {
                session_id: id,
                target: target.map(Into::into),
                module,
                user_id: user,
                ..Default::default()
            };
            let info = client.call(BridgeRequest::SessionCreate { options }).await?;
            println!("{} Created session {}", "✓".green(), str_field(&info, "id").cyan());
        }
        SessionCommand::List { format } => {
            let sessions = client.call(BridgeRequest::SessionList).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
                OutputFormat::Text => print_session_table(sessions.as_array().map(Vec::as_slice).unwrap_or(&[])),
            }
        }
        SessionCommand::Get { id, format } => {
            let info = client.call(BridgeRequest::SessionGet { session_id: id }).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
                OutputFormat::Text => print_session_detail(&info),
            }
        }
        SessionCommand::Destroy { id } => {
            let result = client
                .call(BridgeRequest::SessionDestroy { session_id: id.clone() })
                .await?;
            if result["destroyed"].as_bool().unwrap_or(false) {
                println!("{} Destroyed session {}", "✓".green(), id);
            } else {
                println!("No session {}", id);
            }
        }
    }
    Ok(())
}

async fn cmd_stats(client: &BridgeClient, format: OutputFormat) -> Result<()> {
    let stats = client.call(BridgeRequest::Stats).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("EventBridge Stats");
            println!("=================");
            for key in [
                "active_sessions",
                "total_sessions",
                "reconnecting",
                "failed",
                "permanently_failed",
                "total_subscribers",
                "queued_events",
                "recovery_attempts",
                "sessions_created",
                "sessions_destroyed",
                "interceptors",
                "heartbeat_running",
                "uptime_ms",
            ] {
                println!("{:<20} {}", key, stats[key]);
            }
        }
    }
    Ok(())
}

async fn cmd_simulate(options: SimulationOptions, format: OutputFormat) -> Result<()> {
    debug!(?options, "cmd_simulate: called");
    let report = run_simulation(options).await.context("Simulation failed")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_simulation(&report),
    }
    Ok(())
}

fn print_simulation(report: &SimulationReport) {
    println!(
        "{:<40} {:<20} {:<14} {:>6} {:>8} {:>9}",
        "SESSION", "STATUS", "TARGET", "SENT", "PENDING", "ATTEMPTS"
    );
    for session in &report.sessions {
        println!(
            "{:<40} {:<20} {:<14} {:>6} {:>8} {:>9}",
            session.id,
            colorize_status(&session.status.to_string()),
            session.target,
            session.sent_events,
            session.pending,
            session.recovery_attempts
        );
    }
    println!();
    println!(
        "sent {}  delivered {}  queued {}  failed {}  recovered {}  permanently failed {}",
        report.sent, report.delivered, report.queued, report.failed, report.recovered, report.permanently_failed
    );
    let settled = if report.settled { "yes".green() } else { "no".red() };
    println!("settled {}  elapsed {}ms", settled, report.elapsed_ms);
}

fn print_session_table(sessions: &[Value]) {
    if sessions.is_empty() {
        println!("No sessions");
        return;
    }
    println!(
        "{:<40} {:<20} {:<14} {:<14} {:>8}",
        "ID", "STATUS", "TARGET", "MODULE", "PENDING"
    );
    for session in sessions {
        println!(
            "{:<40} {:<20} {:<14} {:<14} {:>8}",
            str_field(session, "id"),
            colorize_status(str_field(session, "status")),
            str_field(session, "target"),
            str_field(session, "module"),
            session["pending_count"]
        );
    }
}

fn print_session_detail(info: &Value) {
    println!("Session:   {}", str_field(info, "id").cyan());
    println!("Status:    {}", colorize_status(str_field(info, "status")));
    println!("Target:    {}", str_field(info, "target"));
    println!("Module:    {}", str_field(info, "module"));
    println!("User:      {}", str_field(info, "user_id"));
    println!("Created:   {}", str_field(info, "created_at"));
    println!("Idle:      {}ms", info["idle_ms"]);
    println!("Pending:   {}", info["pending_count"]);
    println!("Attempts:  {}", info["recovery_attempts"]);
    if let Some(subscribers) = info["subscribers"].as_object()
        && !subscribers.is_empty()
    {
        println!("Subscribers:");
        for (event, ids) in subscribers {
            println!("  {} -> {}", event, ids);
        }
    }
}

fn print_outcome(outcome: Value) {
    let status = str_field(&outcome, "status");
    let line = match outcome.get("reason").and_then(Value::as_str) {
        Some(reason) => format!("{} ({})", status, reason),
        None => status.to_string(),
    };
    match status {
        "delivered" => println!("{}", line.green()),
        "denied" => println!("{}", line.yellow()),
        _ => println!("{}", line.red()),
    }
}

fn colorize_status(status: &str) -> ColoredString {
    match status {
        "active" => status.green(),
        "reconnecting" => status.yellow(),
        "failed" => status.red(),
        "permanently_failed" => status.red().bold(),
        _ => status.normal(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}
