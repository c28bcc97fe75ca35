//! Drum Metronome Remote (dm-remote) - command-line remote control
//!
//! Finds engines on the LAN and drives one of them over its control API.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::lookup_host;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_common::config::Settings;
use dm_remote::{Command, DeviceId, DeviceRecord, RemoteController};

/// Command-line arguments for dm-remote
#[derive(Parser, Debug)]
#[command(name = "dm-remote")]
#[command(about = "Remote control for drum metronome engines on the local network")]
#[command(version)]
struct Args {
    /// Settings file (defaults to <config dir>/drum-metronome/settings.toml)
    #[arg(short, long, env = "DM_CONFIG")]
    config: Option<PathBuf>,

    /// UDP discovery port
    #[arg(short, long, env = "DM_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List engines answering on the local network
    Scan,
    /// Show an engine's status
    Status { device: String },
    /// Start an engine
    Start { device: String },
    /// Stop an engine
    Stop { device: String },
    /// Set an engine's tempo
    Tempo { device: String, bpm: u32 },
    /// Follow an engine's status until Ctrl+C
    Watch { device: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(port) = args.discovery_port {
        settings.remote.discovery_port = port;
    }

    // Diagnostics go to stderr so command output stays clean
    let level = &settings.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("dm_remote={level},dm_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let controller = RemoteController::from_settings(&settings).context("Failed to create client")?;

    match args.command {
        Action::Scan => {
            controller.scan().await.context("Scan failed")?;
            let devices = controller.devices().await;
            if devices.is_empty() {
                println!("No devices found");
            }
            for record in devices {
                println!("{}", render_record(&record));
            }
        }
        Action::Status { device } => {
            let id = resolve(&device, settings.remote.http_port).await?;
            let record = controller.connect(id).await?;
            println!("{}", render_record(&record));
        }
        Action::Start { device } => {
            run_command(&controller, &device, &settings, Command::Start).await?
        }
        Action::Stop { device } => {
            run_command(&controller, &device, &settings, Command::Stop).await?
        }
        Action::Tempo { device, bpm } => {
            run_command(&controller, &device, &settings, Command::SetTempo(bpm)).await?
        }
        Action::Watch { device } => {
            let id = match device {
                Some(device) => resolve(&device, settings.remote.http_port).await?,
                None => {
                    controller.scan().await.context("Scan failed")?;
                    match controller.devices().await.first() {
                        Some(record) => record.id,
                        None => bail!("No devices found"),
                    }
                }
            };
            watch(&controller, id).await?;
        }
    }

    Ok(())
}

async fn run_command(
    controller: &RemoteController,
    device: &str,
    settings: &Settings,
    command: Command,
) -> Result<()> {
    let id = resolve(device, settings.remote.http_port).await?;
    controller.connect(id).await?;
    controller.select(id).await?;
    let status = controller
        .issue(command)
        .await
        .with_context(|| format!("{} failed on {}", command, id))?;
    println!(
        "{} {}: {} bpm, {}",
        id,
        status.name,
        status.bpm,
        if status.running { "running" } else { "stopped" }
    );
    controller.deselect().await;
    Ok(())
}

async fn watch(controller: &RemoteController, id: DeviceId) -> Result<()> {
    if controller.device(id).await.is_none() {
        controller.connect(id).await?;
    }
    let mut rx = controller.watch_selected();
    let record = controller.select(id).await?;
    println!("{}", render_record(&record));
    let _ = rx.borrow_and_update();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(record) = rx.borrow_and_update().clone() {
                    println!("{}", render_record(&record));
                }
            }
        }
    }
    controller.deselect().await;
    Ok(())
}

/// Accept `host:port`, or a bare host using the configured control port
async fn resolve(device: &str, default_port: u16) -> Result<DeviceId> {
    if let Ok(id) = device.parse::<DeviceId>() {
        return Ok(id);
    }
    let target = if device.contains(':') {
        device.to_string()
    } else {
        format!("{}:{}", device, default_port)
    };
    let addr = lookup_host(&target)
        .await
        .with_context(|| format!("Cannot resolve {}", device))?
        .next()
        .with_context(|| format!("No address for {}", device))?;
    Ok(DeviceId::from(addr))
}

fn render_record(record: &DeviceRecord) -> String {
    format!(
        "{:<22} {:<24} {:>3} bpm  {}",
        record.id.to_string(),
        record.name,
        record.last_known_bpm,
        if record.last_known_running { "running" } else { "stopped" }
    )
}
