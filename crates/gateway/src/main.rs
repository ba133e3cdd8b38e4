//! loragate: forwards packets from a single LoRa front-end to one or
//! more network servers over the UDP push/acknowledge protocol.
//!
//! The first command line argument overrides the network interface
//! used to derive the gateway identifier; everything else comes from
//! `./config.json`.

mod config;
mod forwarder;
mod shutdown;
mod uplink;

use std::process;

use anyhow::Result;
use log::{error, info};

use loragate_proto::Eui;
use loragate_radio::{build_driver, ChipSupervisor};

use config::GatewayConfig;
use forwarder::Forwarder;
use shutdown::ShutdownFlag;
use uplink::{sender_worker, UplinkQueue};

const CONFIG_PATH: &str = "./config.json";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = GatewayConfig::load(CONFIG_PATH)?;
    let iface = std::env::args()
        .nth(1)
        .unwrap_or_else(|| cfg.network_interface.clone());
    let eui = Eui::from_interface(&iface)?;
    info!("started loragate, gateway EUI {} (interface {})", eui, iface);
    cfg.log_summary();

    let servers = cfg.resolve_servers()?;

    let mut driver = build_driver(&cfg.radio)?;
    let supervisor = ChipSupervisor::new(cfg.radio.clone());
    if let Err(e) = supervisor.start(driver.as_mut()).await {
        error!("giving up due to failing LoRa chip setup: {}", e);
        process::exit(1);
    }

    let shutdown = ShutdownFlag::new();
    shutdown::install(&shutdown)?;

    let queue = UplinkQueue::new();
    let sender = tokio::spawn(sender_worker(queue.clone(), shutdown.clone()));

    let mut forwarder = Forwarder::new(
        cfg.radio.clone(),
        supervisor,
        servers,
        eui,
        cfg.location,
        queue,
        shutdown,
    );
    forwarder.run(driver.as_mut()).await;

    info!("shutting down, draining the uplink queue...");
    sender.await?;
    Ok(())
}
