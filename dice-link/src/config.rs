//! Load config from file and environment. Command-line flags are applied on top in main.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dice_core::{PeerAddress, Role};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::session::SessionConfig;

/// Daemon configuration. File: ~/.config/dicelink/config.toml or /etc/dicelink/config.toml.
/// Env overrides: DICELINK_LISTEN_PORT, DICELINK_PEER, DICELINK_PEER_NAME, DICELINK_ROLE,
/// DICELINK_CONNECT_TIMEOUT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Port the listener binds when this device is the receiver (default 45690).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Address of the paired device's listener.
    #[serde(default)]
    pub peer: Option<SocketAddr>,
    /// Display name for the paired device (default: its address).
    #[serde(default)]
    pub peer_name: Option<String>,
    /// Role at startup (default sender).
    #[serde(default = "default_role")]
    pub role: Role,
    /// How long a connect waits for the peer to start listening (default 10000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_listen_port() -> u16 {
    45690
}
fn default_role() -> Role {
    Role::Sender
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            peer: None,
            peer_name: None,
            role: default_role(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Config {
    pub fn peer_address(&self) -> Option<PeerAddress> {
        self.peer.map(|addr| {
            let name = self.peer_name.clone().unwrap_or_else(|| addr.to_string());
            PeerAddress::new(name, addr)
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port)),
            connect_window: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// Load config: merge default, then config file (explicit path or first found), then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = match explicit {
        Some(p) => read_file(p).unwrap_or_default(),
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

/// Apply DICELINK_* overrides. Unparseable values are logged and ignored.
pub fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("DICELINK_LISTEN_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.listen_port = p,
            Err(e) => warn!(value = %s, error = %e, "ignoring DICELINK_LISTEN_PORT"),
        }
    }
    if let Some(s) = var("DICELINK_PEER") {
        match s.parse::<SocketAddr>() {
            Ok(a) => c.peer = Some(a),
            Err(e) => warn!(value = %s, error = %e, "ignoring DICELINK_PEER"),
        }
    }
    if let Some(s) = var("DICELINK_PEER_NAME") {
        c.peer_name = Some(s);
    }
    if let Some(s) = var("DICELINK_ROLE") {
        match s.parse::<Role>() {
            Ok(r) => c.role = r,
            Err(e) => warn!(error = %e, "ignoring DICELINK_ROLE"),
        }
    }
    if let Some(s) = var("DICELINK_CONNECT_TIMEOUT_MS") {
        match s.parse::<u64>() {
            Ok(ms) => c.connect_timeout_ms = ms,
            Err(e) => warn!(value = %s, error = %e, "ignoring DICELINK_CONNECT_TIMEOUT_MS"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/dicelink/config.toml"));
    }
    out.push(PathBuf::from("/etc/dicelink/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    read_file(&path)
}

fn read_file(path: &Path) -> Option<Config> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config");
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => {
            debug!(path = %path.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}
