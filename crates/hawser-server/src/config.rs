//! Server configuration: TOML file with CLI overrides.

use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hawser_transport::shim::LossConfig;

/// Server configuration. Every field has a default, so an empty config file
/// (or none at all) yields a working server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// UDP bind address.
    pub bind_addr: SocketAddr,
    /// Directory holding the served files.
    pub files_dir: PathBuf,
    /// Outbound drop probability for loss exercises; 0 disables the shim.
    pub loss_rate: f64,
    /// Upper bound of the shim's delivery jitter in milliseconds.
    pub max_delay_ms: u64,
    /// Shim RNG seed.
    pub loss_seed: u64,
    /// Surface undecodable datagrams on the data stream (debug only).
    pub deliver_unframed: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            files_dir: PathBuf::from("server_files"),
            loss_rate: 0.0,
            max_delay_ms: 0,
            loss_seed: 0,
            deliver_unframed: false,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<ServerConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Shim parameters, when any impairment is configured.
    pub fn loss(&self) -> Option<LossConfig> {
        if self.loss_rate > 0.0 || self.max_delay_ms > 0 {
            Some(LossConfig {
                loss_rate: self.loss_rate,
                max_delay: Duration::from_millis(self.max_delay_ms),
                seed: self.loss_seed,
            })
        } else {
            None
        }
    }
}
