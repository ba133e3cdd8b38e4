//! Gateway configuration loading and validation

use std::net::ToSocketAddrs;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use serde::Deserialize;

use loragate_proto::Location;
use loragate_radio::ChipSettings;

use crate::uplink::ServerTarget;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub radio: ChipSettings,
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default = "default_interface")]
    pub network_interface: String,
}

fn default_interface() -> String {
    "eth0".to_string()
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path))?;
        let cfg: GatewayConfig =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !self.servers.iter().any(|s| s.enabled) {
            bail!("no enabled servers in the configuration");
        }
        Ok(())
    }

    /// Resolve the enabled servers into concrete delivery targets.
    /// DNS lookups happen once here, before the forwarding loop starts.
    pub fn resolve_servers(&self) -> Result<Vec<ServerTarget>> {
        let mut targets = Vec::new();
        for server in self.servers.iter().filter(|s| s.enabled) {
            let addr = (server.address.as_str(), server.port)
                .to_socket_addrs()
                .with_context(|| format!("resolving {}:{}", server.address, server.port))?
                .next()
                .ok_or_else(|| anyhow!("no addresses found for {}", server.address))?;
            targets.push(ServerTarget {
                addr,
                receive_timeout: Duration::from_millis(server.receive_timeout_ms),
            });
        }
        Ok(targets)
    }

    pub fn log_summary(&self) {
        let radio = &self.radio;
        info!(
            "radio: {} at {:.3} MHz, BW {:.0} kHz, SF{}, CR 4/{}, sync word 0x{:02X}, preamble {}",
            radio.model,
            radio.carrier_frequency_mhz,
            radio.bandwidth_khz,
            radio.spreading_factor,
            radio.coding_rate,
            radio.sync_word,
            radio.preamble_length,
        );
        if radio.scan_all_spreading_factors {
            info!("receiving on all spreading factors");
        }
        for server in &self.servers {
            info!(
                "server {}:{} ({}, ack timeout {} ms)",
                server.address,
                server.port,
                if server.enabled { "enabled" } else { "disabled" },
                server.receive_timeout_ms,
            );
        }
    }
}
