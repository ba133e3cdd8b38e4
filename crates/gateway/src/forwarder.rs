//! Stats/forwarding orchestrator: the main receive/publish loop

use std::time::Duration;

use log::{debug, info};
use tokio::time::{sleep, Instant};

use loragate_proto::{self as proto, Eui, Location};
use loragate_radio::{
    receive_cycle, ChipSettings, ChipSupervisor, RadioDriver, RecvOutcome, TrafficStats,
};

use crate::shutdown::ShutdownFlag;
use crate::uplink::{OutboundPacket, ServerTarget, UplinkQueue};

/// Interval between statistics updates pushed upstream.
pub const STAT_INTERVAL: Duration = Duration::from_secs(420);
/// Idle pause after an empty fixed-channel receive.
const IDLE_DELAY: Duration = Duration::from_millis(20);

/// Everything the forwarding loop owns. Counters and timers live here
/// rather than in globals; the only thing shared with the sender
/// worker is the queue.
pub struct Forwarder {
    settings: ChipSettings,
    supervisor: ChipSupervisor,
    servers: Vec<ServerTarget>,
    eui: Eui,
    location: Option<Location>,
    queue: UplinkQueue,
    shutdown: ShutdownFlag,
    pub stats: TrafficStats,
    pub stat_interval: Duration,
}

impl Forwarder {
    pub fn new(
        settings: ChipSettings,
        supervisor: ChipSupervisor,
        servers: Vec<ServerTarget>,
        eui: Eui,
        location: Option<Location>,
        queue: UplinkQueue,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            settings,
            supervisor,
            servers,
            eui,
            location,
            queue,
            shutdown,
            stats: TrafficStats::default(),
            stat_interval: STAT_INTERVAL,
        }
    }

    /// Hand one protocol message to the queue, once per server target.
    async fn fan_out(&mut self, payload: Vec<u8>) {
        for target in &self.servers {
            self.queue
                .enqueue(OutboundPacket::new(*target, payload.clone()))
                .await;
        }
        self.stats.forw_packets += 1;
        self.stats.forw_packets_crc_good += 1;
    }

    /// Run until the shutdown flag clears. The driver stays owned by
    /// this task for the whole run; the first statistics update fires
    /// immediately.
    pub async fn run(&mut self, driver: &mut dyn RadioDriver) {
        let mut next_stat_update = Instant::now();

        while self.shutdown.is_running() {
            if Instant::now() >= next_stat_update {
                next_stat_update = Instant::now() + self.stat_interval;
                info!("sending stat update to {} server(s)", self.servers.len());
                let packet = proto::stat_packet(&self.eui, self.location.as_ref(), &self.stats);
                self.fan_out(packet).await;
            }
            if !self.shutdown.is_running() {
                break;
            }

            match receive_cycle(driver, &self.settings, &mut self.stats).await {
                RecvOutcome::Data(sample) => {
                    let packet = proto::data_packet(&self.eui, &self.settings, &sample);
                    self.fan_out(packet).await;
                }
                RecvOutcome::NoData => {
                    if self.shutdown.is_running() {
                        self.supervisor.maybe_recover(driver).await;
                        if !self.settings.scan_all_spreading_factors {
                            sleep(IDLE_DELAY).await;
                        }
                    }
                }
                RecvOutcome::Failed { insist } => {
                    if insist {
                        debug!("transmission lost mid-air, listening again right away");
                    }
                }
            }
        }
    }
}
