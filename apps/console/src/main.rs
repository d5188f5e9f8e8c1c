//! # servo-console
//!
//! Headless operator console for the servo panel.
//!
//! ```text
//! servo-console --url ws://rig.local:5000/ws
//! > list
//! > drag "Schulter Horizontal" 35
//! > release "Schulter Horizontal"
//! > preset save Greeting
//! ```
//!
//! Configuration comes from `panel.toml` in the platform config directory,
//! then `SERVO_*` environment variables, then the flags below.

mod render;
mod repl;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use servo_core::{BoundsPolicy, MemoryBackend, PresetBackend, PresetRemoval};
use servo_db::{Database, DbConfig};
use servo_sync::{AgentBuilder, AgentHandle, PanelConfig, SyncResult, TransportConfig, WsChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::repl::{ConsoleCommand, HELP};

#[derive(Debug, Parser)]
#[command(name = "servo-console", version, about = "Operator console for a servo rig")]
struct Args {
    /// Path to panel.toml
    #[arg(long, env = "SERVO_PANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Controller WebSocket URL
    #[arg(long)]
    url: Option<String>,

    /// Preset database file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Out-of-range angles: clamp, reject or advisory
    #[arg(long)]
    bounds: Option<BoundsPolicy>,

    /// Keep presets in memory only
    #[arg(long)]
    memory: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,servo_sync=debug,servo_db=info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<PanelConfig> {
    let mut config = PanelConfig::load(args.config.clone()).context("loading panel config")?;

    if let Some(url) = &args.url {
        config.controller.url = url.clone();
    }
    if let Some(db) = &args.db {
        config.storage.db_path = Some(db.clone());
    }
    if let Some(policy) = args.bounds {
        config.control.bounds_policy = policy;
    }

    config.validate().context("invalid panel config")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        client = %config.client_id(),
        url = %config.controller_url(),
        policy = %config.bounds_policy(),
        "Starting servo console"
    );

    let channel = WsChannel::new(TransportConfig::from(&config));

    if args.memory {
        return run(&config, channel, MemoryBackend::new()).await;
    }

    let path = config
        .db_path()
        .context("no data directory for the preset database; pass --db or --memory")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let db = Database::new(DbConfig::new(&path))
        .await
        .with_context(|| format!("opening preset database {}", path.display()))?;
    let result = run(&config, channel, db.kv()).await;
    db.close().await;
    result
}

async fn run<B>(config: &PanelConfig, channel: WsChannel, backend: B) -> anyhow::Result<()>
where
    B: PresetBackend + 'static,
{
    let handle = AgentBuilder::new(channel, backend)
        .with_config(config)
        .spawn()
        .context("starting control agent")?;

    let mut notices = handle.notices();
    let printer = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => println!("{}", render::notice_line(&notice)),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Notice printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let command = match repl::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if command == ConsoleCommand::Quit {
            break;
        }

        match execute(&handle, command).await {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(e) if e.is_user_error() => println!("{}", e),
            Err(e) => error!(error = %e, "Command failed"),
        }
    }

    handle.shutdown().await;
    printer.abort();
    Ok(())
}

/// Runs one command and returns what to print.
async fn execute(handle: &AgentHandle, command: ConsoleCommand) -> SyncResult<Option<String>> {
    let output = match command {
        ConsoleCommand::List => Some(render::panel(&handle.sync().await?)),
        ConsoleCommand::Status => Some(render::status_line(&handle.sync().await?)),
        ConsoleCommand::Drag { name, angle } => {
            let shown = handle.preview(&name, angle).await?;
            Some(format!("{} -> {:.1}° (not sent)", name, shown))
        }
        ConsoleCommand::Release { name } => {
            let sent = handle.commit(&name).await?;
            Some(format!("{} -> {:.1}°", name, sent))
        }
        ConsoleCommand::Set { name, angle } => {
            let sent = handle.commit_value(&name, angle).await?;
            Some(format!("{} -> {:.1}°", name, sent))
        }
        ConsoleCommand::Zero { name } => {
            handle.zero(&name).await?;
            None
        }
        ConsoleCommand::Enable { name, enable } => {
            handle.set_enable(&name, enable).await?;
            None
        }
        ConsoleCommand::Fine { name } => {
            let request = handle.request_fine_tune(&name).await?;
            Some(render::fine_tune_prompt(&request))
        }
        ConsoleCommand::Delta { ticket, response } => {
            match handle.resolve_fine_tune(ticket, response.as_deref()).await? {
                Some(angle) => Some(format!("#{} sent {:.1}°", ticket, angle)),
                None => Some(format!("#{} cancelled", ticket)),
            }
        }
        ConsoleCommand::EnableAll { enable } => {
            handle.enable_all(enable).await?;
            None
        }
        ConsoleCommand::ZeroAll => {
            handle.zero_all().await?;
            None
        }
        ConsoleCommand::Wave => {
            handle.wave().await?;
            None
        }
        ConsoleCommand::Stop { confirmed: false } => {
            Some("Emergency stop disables every servo. Type 'stop confirm'.".to_string())
        }
        ConsoleCommand::Stop { confirmed: true } => {
            handle.emergency_stop().await?;
            None
        }
        ConsoleCommand::Refresh => {
            handle.refresh().await?;
            None
        }
        ConsoleCommand::PresetSave { name } => {
            let saved = handle.save_preset(&name).await?;
            let verb = if saved.replaced { "Replaced" } else { "Saved" };
            Some(format!("{} '{}' ({} servos)", verb, saved.name, saved.entries))
        }
        ConsoleCommand::PresetLoad { name } => {
            let report = handle.load_preset(&name).await?;
            Some(render::load_report(&report))
        }
        ConsoleCommand::PresetDelete { name } => match handle.delete_preset(&name).await? {
            PresetRemoval::Removed => Some(format!("Deleted '{}'", name)),
            PresetRemoval::NotFound => Some(format!("No preset named '{}'", name)),
        },
        ConsoleCommand::Presets => {
            let names = handle.list_presets().await?;
            if names.is_empty() {
                Some("(no presets)".to_string())
            } else {
                Some(names.join("\n"))
            }
        }
        ConsoleCommand::Help => Some(HELP.to_string()),
        ConsoleCommand::Quit => None,
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_core::{ActuatorSpec, Command};
    use servo_sync::{MemoryChannel, ServerEvent};

    async fn console() -> (AgentHandle, servo_sync::ControllerEnd) {
        let (channel, mut controller) = MemoryChannel::pair();
        let handle = AgentBuilder::new(channel, MemoryBackend::new()).spawn().unwrap();
        controller
            .emit(ServerEvent::config([(
                "Hals".to_string(),
                ActuatorSpec::new("brick-a", 0, -90.0, 90.0, 0.0, true),
            )]))
            .await
            .unwrap();
        handle.sync().await.unwrap();
        controller.drain_commands();
        (handle, controller)
    }

    async fn run_line(handle: &AgentHandle, line: &str) -> SyncResult<Option<String>> {
        let command = repl::parse(line).unwrap().unwrap();
        execute(handle, command).await
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "servo-console",
            "--url",
            "ws://10.0.0.5:5000/ws",
            "--bounds",
            "reject",
            "--memory",
        ])
        .unwrap();
        assert_eq!(args.url.as_deref(), Some("ws://10.0.0.5:5000/ws"));
        assert_eq!(args.bounds, Some(BoundsPolicy::Reject));
        assert!(args.memory);

        assert!(Args::try_parse_from(["servo-console", "--bounds", "loose"]).is_err());
    }

    #[tokio::test]
    async fn test_drag_then_release_sends_once() {
        let (handle, mut controller) = console().await;

        let out = run_line(&handle, "drag Hals 20").await.unwrap().unwrap();
        assert!(out.contains("not sent"));
        assert!(controller.try_next_command().is_none());

        run_line(&handle, "release Hals").await.unwrap();
        handle.sync().await.unwrap();
        assert_eq!(
            controller.drain_commands(),
            vec![Command::set_position("Hals", 20.0)]
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_servo_is_user_error() {
        let (handle, _controller) = console().await;

        let err = run_line(&handle, "zero Schwanz").await.unwrap_err();
        assert!(err.is_user_error());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_fine_tune_round_trip() {
        let (handle, mut controller) = console().await;

        let prompt = run_line(&handle, "fine Hals").await.unwrap().unwrap();
        assert!(prompt.starts_with("#1 fine-tune Hals"));

        let out = run_line(&handle, "delta 1 5").await.unwrap().unwrap();
        assert_eq!(out, "#1 sent 5.0°");
        handle.sync().await.unwrap();
        assert_eq!(
            controller.drain_commands(),
            vec![Command::set_position("Hals", 5.0)]
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_requires_confirm() {
        let (handle, mut controller) = console().await;

        let out = run_line(&handle, "stop").await.unwrap().unwrap();
        assert!(out.contains("stop confirm"));
        handle.sync().await.unwrap();
        assert!(controller.try_next_command().is_none());

        run_line(&handle, "stop confirm").await.unwrap();
        handle.sync().await.unwrap();
        assert_eq!(controller.drain_commands(), vec![Command::EmergencyStop]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_preset_commands() {
        let (handle, _controller) = console().await;

        let saved = run_line(&handle, "preset save Rest").await.unwrap().unwrap();
        assert_eq!(saved, "Saved 'Rest' (1 servos)");
        let listed = run_line(&handle, "presets").await.unwrap().unwrap();
        assert_eq!(listed, "Rest");
        let deleted = run_line(&handle, "preset delete Rest").await.unwrap().unwrap();
        assert_eq!(deleted, "Deleted 'Rest'");
        let missing = run_line(&handle, "preset delete Rest").await.unwrap().unwrap();
        assert_eq!(missing, "No preset named 'Rest'");

        handle.shutdown().await;
    }
}
