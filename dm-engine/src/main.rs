//! Drum Metronome Engine (dm-engine) - Main entry point
//!
//! Runs the beat scheduler, the discovery responder and the HTTP control
//! server, and reads console commands from stdin until Ctrl+C or `quit`.

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_common::config::{default_settings_path, Settings};
use dm_engine::api::{self, AppContext};
use dm_engine::control::{ConsoleCommand, ControlSurface};
use dm_engine::discovery::DiscoveryResponder;
use dm_engine::events::{BeatEvent, MetronomeEvent};
use dm_engine::practice::PracticeRoutines;
use dm_engine::tap::TapEstimator;
use dm_engine::{BeatScheduler, InstanceInfo, TimingState};

/// Command-line arguments for dm-engine
#[derive(Parser, Debug)]
#[command(name = "dm-engine")]
#[command(about = "Drum metronome with LAN remote control")]
#[command(version)]
struct Args {
    /// Settings file (defaults to <config dir>/drum-metronome/settings.toml)
    #[arg(short, long, env = "DM_CONFIG")]
    config: Option<PathBuf>,

    /// Instance name announced to remote clients
    #[arg(short, long, env = "DM_NAME")]
    name: Option<String>,

    /// HTTP control API port
    #[arg(short, long, env = "DM_HTTP_PORT")]
    port: Option<u16>,

    /// UDP discovery port
    #[arg(short, long, env = "DM_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Initial tempo
    #[arg(short, long)]
    bpm: Option<u32>,

    /// Do not read console commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Print every beat to stdout
    #[arg(long)]
    show_beats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(name) = args.name {
        settings.remote.name = name;
    }
    if let Some(port) = args.port {
        settings.remote.http_port = port;
    }
    if let Some(port) = args.discovery_port {
        settings.remote.discovery_port = port;
    }
    if let Some(bpm) = args.bpm {
        settings.metronome.bpm = bpm;
    }

    let level = &settings.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("dm_engine={level},dm_common={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Drum Metronome Engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match args.config.or_else(default_settings_path) {
        Some(path) if path.exists() => info!("Settings: {}", path.display()),
        _ => info!("Settings: built-in defaults"),
    }

    let initial = TimingState::from_settings(&settings.metronome)
        .context("Invalid metronome settings")?;
    let scheduler = BeatScheduler::new(initial);
    let cancel = CancellationToken::new();

    let timing = scheduler.spawn_timing_loop(cancel.clone());

    let http_addr = SocketAddr::from(([0, 0, 0, 0], settings.remote.http_port));
    let listener = api::server::bind(http_addr)
        .await
        .context("Failed to start control server")?;
    let http_port = listener.local_addr()?.port();
    let info = Arc::new(InstanceInfo::new(settings.remote.name.clone(), http_port));

    let discovery_addr = SocketAddr::from(([0, 0, 0, 0], settings.remote.discovery_port));
    let responder =
        DiscoveryResponder::bind(discovery_addr, Arc::clone(&scheduler), Arc::clone(&info))
            .await
            .context("Failed to start discovery responder")?;

    info!(
        "Instance '{}' on HTTP port {}, discovery port {}",
        info.name, http_port, settings.remote.discovery_port
    );

    let ctx = AppContext::new(Arc::clone(&scheduler), Arc::clone(&info), cancel.clone());
    let http = tokio::spawn(api::serve(listener, ctx, cancel.clone()));
    let discovery = tokio::spawn(responder.run(cancel.clone()));

    let practice = PracticeRoutines::from_settings(Arc::clone(&scheduler), &settings.practice)
        .context("Invalid practice settings")?;
    let routines = practice.spawn(cancel.clone());

    if args.show_beats {
        tokio::spawn(print_beats(scheduler.subscribe(), cancel.clone()));
    }

    if !args.no_console {
        let surface = Arc::new(ControlSurface::new(
            Arc::clone(&scheduler),
            practice,
            TapEstimator::from_settings(&settings.tap),
        ));
        tokio::spawn(run_console(surface, cancel.clone()));
    }

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = cancel.cancelled() => info!("Quit requested from console"),
    }
    cancel.cancel();

    let services = [
        ("Control server", http.await),
        ("Discovery responder", discovery.await),
    ];
    for (label, result) in services {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} failed: {}", label, e),
            Err(e) => error!("{} task panicked: {}", label, e),
        }
    }
    timing.await.context("Timing loop panicked")?;
    routines.await.context("Practice routines panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Read console lines on a dedicated thread so a blocked stdin read never
/// holds up runtime shutdown
async fn run_console(surface: Arc<ControlSurface>, cancel: CancellationToken) {
    let (tx, mut rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Commands: start, stop, toggle, tempo <bpm>, nudge <delta>, tap,");
    println!("          sig <beats> <subdiv>, accent on|off,");
    println!("          ladder <start> <end> <step> <bars>, ladder cancel,");
    println!("          rudiments start|stop|list|all|bars <n>|hand r|l|mixed|only <a, b>,");
    println!("          groove list|use <name>|loops <n>|start|stop, status, quit");

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = rx.recv() => line,
        };
        let Some(line) = line else {
            warn!("Console input closed; continuing without console");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => {
                cancel.cancel();
                break;
            }
            Ok(command) => match surface.execute(command).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => println!("error: {}", e),
            },
            Err(e) => println!("{}", e),
        }
    }
}

/// Minimal visual collaborator: one line per tick
async fn print_beats(mut rx: broadcast::Receiver<MetronomeEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(MetronomeEvent::Beat(beat)) => println!("{}", render_beat(&beat)),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Beat display lagged by {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn render_beat(beat: &BeatEvent) -> String {
    let marker = if beat.is_accent {
        "!"
    } else if beat.is_beat {
        "*"
    } else {
        "."
    };
    format!(
        "{} {}.{}.{}",
        marker,
        beat.bar_index + 1,
        beat.beat_index + 1,
        beat.subdivision_index + 1
    )
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
