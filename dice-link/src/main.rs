// Dice link: two paired devices take turns rolling; one sends, the other shows the roll.

mod config;
mod connection;
mod initiator;
mod listener;
mod session;
mod ui;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dice_core::{RandomDice, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::session::SessionController;

#[derive(Debug, Parser)]
#[command(name = "dice-link", version, about = "Roll dice between two paired devices")]
struct Args {
    /// Config file (default: ~/.config/dicelink/config.toml, then /etc/dicelink/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Role at startup: sender connects, receiver listens
    #[arg(long)]
    role: Option<Role>,
    /// Paired device's listener address
    #[arg(long)]
    peer: Option<SocketAddr>,
    /// Display name for the paired device
    #[arg(long)]
    peer_name: Option<String>,
    /// Port to listen on as receiver
    #[arg(long)]
    listen_port: Option<u16>,
}

impl Args {
    fn apply(&self, cfg: &mut config::Config) {
        if let Some(role) = self.role {
            cfg.role = role;
        }
        if let Some(peer) = self.peer {
            cfg.peer = Some(peer);
        }
        if let Some(name) = &self.peer_name {
            cfg.peer_name = Some(name.clone());
        }
        if let Some(port) = self.listen_port {
            cfg.listen_port = port;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dice_link=info,dice_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load(args.config.as_deref());
    args.apply(&mut cfg);
    info!(role = %cfg.role, peer = ?cfg.peer, listen_port = cfg.listen_port, "starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let (screen, alerts, render_rx) = ui::terminal();
    let renderer = tokio::spawn(ui::run_renderer(render_rx));
    let session = SessionController::new(
        cfg.role,
        cfg.session_config(),
        Arc::new(screen.clone()),
        Arc::new(alerts),
        Arc::new(ui::ConfiguredPeer::new(cfg.peer_address())),
        Box::new(RandomDice::new()),
    );
    session.start().await;

    tokio::select! {
        res = command_loop(&session, &screen) => res?,
        res = shutdown_signal() => res?,
    }

    session.teardown().await;
    drop(session);
    drop(screen);
    // Let the renderer flush what the teardown queued.
    let _ = tokio::time::timeout(Duration::from_millis(500), renderer).await;
    Ok(())
}

/// Terminal controls standing in for the buttons and gestures of the screen.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Command {
    Roll,
    Switch,
    Reconnect,
    Foreground,
    Background,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "roll" | "r" => Ok(Command::Roll),
            "switch" | "s" => Ok(Command::Switch),
            "reconnect" | "refresh" => Ok(Command::Reconnect),
            "fg" => Ok(Command::Foreground),
            "bg" => Ok(Command::Background),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(format!("unknown command {other:?}, try \"help\"")),
        }
    }
}

const HELP: &str = "commands: roll | switch | reconnect | fg | bg | status | quit";

async fn command_loop(session: &SessionController, screen: &ui::TerminalUi) -> anyhow::Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match line.parse::<Command>() {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match cmd {
            Command::Roll => session.roll_dice().await,
            Command::Switch => session.request_mode_switch().await,
            Command::Reconnect => session.reconnect().await,
            Command::Foreground => session.set_foreground(true).await,
            Command::Background => session.set_foreground(false).await,
            Command::Status => {
                println!(
                    "role: {}, session: {:?}, foreground: {}",
                    session.role().await,
                    session.state().await,
                    session.is_foreground().await
                );
                screen.dump();
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown requested");
    Ok(())
}
